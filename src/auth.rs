use std::fmt;

/// An API credential that never shows up in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// How requests to a provider are authenticated.
#[derive(Debug, Clone, Default)]
pub enum Auth {
    #[default]
    None,
    Bearer(Token),
    Basic { username: String, password: Token },
}

impl Auth {
    pub fn bearer(token: Option<Token>) -> Self {
        token.map_or(Self::None, Self::Bearer)
    }

    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::None => request,
            Self::Bearer(token) => request.bearer_auth(token.as_str()),
            Self::Basic { username, password } => {
                request.basic_auth(username, Some(password.as_str()))
            }
        }
    }
}
