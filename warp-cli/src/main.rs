use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use warp::{audit, Engine};
use warp_crdt::WriterId;
use warp_crypto::Oid;
use warp_materialize::MaterializeOptions;
use warp_store::disk::DiskStore;

const EXIT_OK: u8 = 0;
const EXIT_USAGE: u8 = 2;
const EXIT_INTERNAL: u8 = 1;

#[derive(Parser)]
#[clap(name = "warp", about = "Integrity and verification tooling for a warp graph repository")]
struct Cli {
    /// The directory backing the disk-based object store.
    #[clap(long, global = true, default_value = ".")]
    repo: PathBuf,
    /// The graph within the repository to operate on.
    #[clap(long, global = true, default_value = "default")]
    graph: String,
    /// Emit machine-readable JSON instead of human text.
    #[clap(long, global = true)]
    json: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walks writer chains checking lamport monotonicity and patch/commit
    /// consistency, optionally gated by trust chain membership.
    VerifyAudit {
        /// Lamport-counter cutoff; patches are still integrity-checked
        /// below it, only the reported window narrows.
        #[clap(long)]
        since: Option<u64>,
        /// Restrict the audit to a single writer, hex-encoded.
        #[clap(long)]
        writer: Option<String>,
        /// Reject the audit if any observed writer is not in the trust
        /// chain's trusted set.
        #[clap(long)]
        trust_required: bool,
        /// Require the trust chain's current tip to match this sha.
        #[clap(long)]
        trust_ref_tip: Option<String>,
    },
    /// Cross-checks the cached bitmap index against materialized state
    /// over a seeded sample.
    VerifyIndex {
        /// PRNG seed for the sampled cross-check.
        #[clap(long, default_value_t = 0)]
        seed: u64,
        /// Fraction of nodes/edges to sample, in `(0.0, 1.0]`.
        #[clap(long, default_value_t = 1.0)]
        sample_rate: f64,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(err) if err.is::<UsageError>() => {
            eprintln!("usage error: {err:#}");
            ExitCode::from(EXIT_USAGE)
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

fn run(cli: &Cli) -> Result<()> {
    let store = DiskStore::open(&cli.repo).context("opening repository")?;

    match &cli.command {
        Command::VerifyAudit { since, writer, trust_required, trust_ref_tip } => {
            let writer_filter = writer
                .as_deref()
                .map(|s| s.parse::<WriterId>().map_err(|_| UsageError(format!("invalid --writer {s:?}"))))
                .transpose()?;
            let trust_ref_tip = trust_ref_tip
                .as_deref()
                .map(|s| s.parse::<Oid>().map_err(|_| UsageError(format!("invalid --trust-ref-tip {s:?}"))))
                .transpose()?;

            let report = audit(&store, &cli.graph, *since, writer_filter, *trust_required, trust_ref_tip)?;
            if cli.json {
                println!(
                    "{{\"writersChecked\":{},\"patchesExamined\":{},\"patchesInWindow\":{},\"untrusted\":{}}}",
                    report.writers_checked.len(),
                    report.patches_examined,
                    report.patches_in_window,
                    report.untrusted.len(),
                );
            } else {
                println!(
                    "audit ok: {} writer(s), {} patch(es) examined, {} in window, {} untrusted",
                    report.writers_checked.len(),
                    report.patches_examined,
                    report.patches_in_window,
                    report.untrusted.len(),
                );
            }
            Ok(())
        }
        Command::VerifyIndex { seed, sample_rate } => {
            let mut engine = Engine::new(&store, cli.graph.clone(), MaterializeOptions::default());
            let report = engine.verify_index(*seed, *sample_rate)?;
            let sampled = report.passed + report.failed;
            if cli.json {
                println!(
                    "{{\"seed\":{},\"sampled\":{},\"passed\":{},\"mismatches\":{}}}",
                    report.seed,
                    sampled,
                    report.passed,
                    report.mismatches.len(),
                );
            } else {
                println!(
                    "verify-index: {} sampled, {} passed, {} mismatch(es)",
                    sampled,
                    report.passed,
                    report.mismatches.len(),
                );
            }
            if report.mismatches.is_empty() {
                Ok(())
            } else {
                anyhow::bail!("bitmap index verification found {} mismatch(es)", report.mismatches.len());
            }
        }
    }
}
