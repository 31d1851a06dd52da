mod progress;
mod styling;
mod summary;
mod tables;

pub use progress::PhaseProgress;
pub use styling::{dim, magenta_bold};
pub use summary::{
    print_build_summary, print_cancel_summary, print_drain_summary, print_promotion_summary,
    print_sbom_summary,
};

/// Prints the `promoctl` banner to stderr.
///
/// Displays the tool name, version, and description at the start of execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🚀 promoctl"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Build, promotion and attestation harness")
    );
}
