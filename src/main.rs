//! attest-bridge CLI
//!
//! Entry point for the `attest-bridge` command-line tool.

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};

use attest_bridge::fetch::HttpFetcher;
use attest_bridge::policy::{Policy, POLICY_FILENAME};
use attest_bridge::rekor::HttpLogClient;
use attest_bridge::release::GithubReleaseQuery;
use attest_bridge::{pipeline, Error, LayoutMode, VerificationConfig};

#[derive(Parser)]
#[command(name = "attest-bridge")]
#[command(about = "Verify release artifact provenance and amend a trust policy", version)]
struct Cli {
    /// GitHub repository owner
    #[arg(long)]
    owner: String,

    /// GitHub repository name
    #[arg(long)]
    repo: String,

    /// GitHub API token
    #[arg(long)]
    token: String,

    /// Local file substituted for the artifact download, matched by basename
    #[arg(long)]
    local: Option<PathBuf>,

    /// Existing policy or legacy allowlist to amend
    #[arg(long)]
    allowlist: Option<PathBuf>,

    /// Path the artifact will occupy on the target host; verified hashes
    /// are recorded under this key in the policy
    #[arg(long)]
    destination: String,

    /// Require transparency log inclusion for every artifact
    #[arg(long)]
    log_check: bool,

    /// Transparency log base URL
    #[arg(long)]
    log_url: Option<String>,

    /// Layout verification mode
    #[arg(long, value_enum, default_value = "none")]
    layout_mode: LayoutArg,

    /// Signed layout document (full mode)
    #[arg(long)]
    layout: Option<PathBuf>,

    /// The layout's signing key, PKCS#8 PEM (full mode)
    #[arg(long)]
    layout_key: Option<PathBuf>,

    /// Password for an encrypted layout key
    #[arg(long)]
    layout_key_password: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LayoutArg {
    /// No layout verification
    None,
    /// Synthesized single-step layout
    Simple,
    /// Caller-supplied signed layout
    Full,
}

impl From<LayoutArg> for LayoutMode {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::None => LayoutMode::None,
            LayoutArg::Simple => LayoutMode::Simple,
            LayoutArg::Full => LayoutMode::Full,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = VerificationConfig {
        local_artifact_path: cli.local,
        enable_log_check: cli.log_check,
        log_url: cli.log_url,
        layout_mode: cli.layout_mode.into(),
        custom_layout_path: cli.layout,
        custom_layout_key: cli.layout_key,
        layout_key_password: cli.layout_key_password,
    };

    let query = GithubReleaseQuery::new(&cli.owner, &cli.repo, &cli.token);
    let log_client = match config.log_url.as_deref() {
        Some(url) => HttpLogClient::new(url),
        None => HttpLogClient::default(),
    };

    let outcome = match pipeline::run(&query, &HttpFetcher, &log_client, &config) {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("error: {}", err);
            process::exit(err.exit_code().as_i32());
        }
    };

    let mut policy = match Policy::load(cli.allowlist.as_deref()) {
        Ok(policy) => policy,
        Err(err) => {
            let err = Error::from(err);
            eprintln!("error: {}", err);
            process::exit(err.exit_code().as_i32());
        }
    };

    for artifact in &outcome.verified {
        policy.append(&cli.destination, &artifact.digest);
    }

    let output = PathBuf::from(POLICY_FILENAME);
    if let Err(err) = policy.persist(&output) {
        let err = Error::from(err);
        eprintln!("error: {}", err);
        process::exit(err.exit_code().as_i32());
    }

    eprintln!(
        "policy written to {} ({} verified hash(es) for {} from release {})",
        output.display(),
        outcome.verified.len(),
        cli.destination,
        outcome.tag
    );
}
