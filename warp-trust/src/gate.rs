//! The sync-protocol trust gate: evaluates a set of writers extracted
//! from inbound patches against the trust chain, with `off` / `log-only`
//! / `enforce` modes and fail-closed/fail-open semantics on evaluator
//! failure.

use crate::chain::TrustChainService;
use crate::error::TrustError;
use std::collections::BTreeSet;
use tracing::warn;
use warp_crdt::WriterId;
use warp_store::ObjectStore;

/// How strictly the sync protocol enforces trust chain membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateMode {
    /// Trust is not evaluated; every writer passes through.
    Off,
    /// Trust is evaluated and untrusted writers are logged, but nothing
    /// is rejected.
    LogOnly,
    /// Any untrusted writer causes the whole batch to be rejected.
    Enforce,
}

/// The gate's verdict for one evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the caller should proceed with applying the patches.
    pub allowed: bool,
    /// Writers found ineligible for trust (not in the trusted set, in a
    /// mode that evaluates trust at all).
    pub untrusted: BTreeSet<WriterId>,
    /// Set when the evaluator itself failed (e.g. a malformed chain) and
    /// the verdict reflects fail-closed/fail-open policy rather than an
    /// actual trust decision.
    pub evaluator_error: Option<String>,
}

impl GateVerdict {
    fn pass_through() -> Self {
        Self { allowed: true, untrusted: BTreeSet::new(), evaluator_error: None }
    }
}

/// Evaluates `writers` (the writer ids extracted from the patches being
/// applied, never from advertised frontier keys) against the trust chain
/// of `graph` under `mode`.
///
/// Evaluator failures (a chain that does not load or verify) fail-closed
/// in `Enforce` — rejecting the batch — and fail-open in `LogOnly`,
/// reporting an error-allowed verdict so a broken chain does not stall an
/// otherwise best-effort deployment. `Off` never consults the chain.
pub fn evaluate(
    store: &dyn ObjectStore,
    graph: &str,
    mode: GateMode,
    writers: &BTreeSet<WriterId>,
) -> GateVerdict {
    if mode == GateMode::Off {
        return GateVerdict::pass_through();
    }

    let service = TrustChainService::new(store, graph.to_owned());
    let records = match service.load_chain() {
        Ok(records) => records,
        Err(err) => return evaluator_failed(mode, err),
    };
    if let Err(err) = crate::chain::verify_chain_signatures(&records) {
        return evaluator_failed(mode, err);
    }

    let evaluated = crate::chain::evaluate_writers(&records, writers);
    let untrusted: BTreeSet<WriterId> = writers.difference(&evaluated.trusted).copied().collect();

    match mode {
        GateMode::Off => unreachable!("handled above"),
        GateMode::LogOnly => {
            if !untrusted.is_empty() {
                warn!(?untrusted, graph, "untrusted writers observed in log-only trust gate");
            }
            GateVerdict { allowed: true, untrusted, evaluator_error: None }
        }
        GateMode::Enforce => GateVerdict { allowed: untrusted.is_empty(), untrusted, evaluator_error: None },
    }
}

fn evaluator_failed(mode: GateMode, err: TrustError) -> GateVerdict {
    match mode {
        GateMode::Off => GateVerdict::pass_through(),
        GateMode::LogOnly => {
            warn!(error = %err, "trust gate evaluator failed; failing open in log-only mode");
            GateVerdict { allowed: true, untrusted: BTreeSet::new(), evaluator_error: Some(err.to_string()) }
        }
        GateMode::Enforce => {
            GateVerdict { allowed: false, untrusted: BTreeSet::new(), evaluator_error: Some(err.to_string()) }
        }
    }
}
