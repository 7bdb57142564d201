//! Proof-of-work mining for relay admission.
//!
//! Some relays require event ids with a minimum number of leading zero bits
//! (NIP-13). The miner searches nonces: each attempt rewrites the draft's
//! nonce tag, recomputes the canonical id, and counts leading zeros. The
//! search is bounded by wall-clock time, not iterations; a cancel flag
//! checked every [`CANCEL_CHECK_INTERVAL`] nonces keeps cancellation
//! responsive.
//!
//! # Warning
//!
//! [`mine`] is CPU-intensive. Callers in async contexts should use
//! [`mine_with_timeout`], which runs it on `spawn_blocking` and races it
//! against a timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::EventDraft;

/// How many nonces between cancel-flag checks.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Result of a bounded nonce search.
#[derive(Debug, Clone)]
pub enum MinerOutcome {
    /// A nonce reaching the target difficulty was found.
    Mined {
        /// The draft with its nonce tag set; its canonical id meets the
        /// target.
        draft: EventDraft,
        /// The winning nonce.
        nonce: u64,
        /// Nonces tried, including the winner.
        iterations: u64,
    },
    /// The cancel flag was raised before a nonce was found.
    Cancelled {
        /// Nonces tried before stopping.
        iterations: u64,
    },
}

/// Number of leading zero bits in an id, saturating at `u8::MAX` for the
/// all-zero id.
pub fn leading_zero_bits(id: &[u8; 32]) -> u8 {
    let mut bits: u8 = 0;
    for &byte in id {
        if byte != 0 {
            return bits.saturating_add(byte.leading_zeros() as u8);
        }
        bits = bits.saturating_add(8);
    }
    bits
}

/// Searches nonces from 0 until the draft's canonical id has at least
/// `difficulty` leading zero bits or `cancel` is raised.
///
/// Difficulty 0 stamps the nonce tag and returns immediately; the tag still
/// records the target so verifiers can see what was asked for. The returned
/// draft differs from the input only in its nonce tag; `created_at` is not
/// refreshed during the search.
pub fn mine(draft: &EventDraft, difficulty: u8, cancel: &AtomicBool) -> Result<MinerOutcome> {
    let mut candidate = draft.clone();

    if difficulty == 0 {
        candidate.set_nonce(0, 0);
        return Ok(MinerOutcome::Mined {
            draft: candidate,
            nonce: 0,
            iterations: 1,
        });
    }

    let mut nonce: u64 = 0;
    loop {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            return Ok(MinerOutcome::Cancelled { iterations: nonce });
        }
        candidate.set_nonce(nonce, difficulty);
        let id = candidate.canonical_id()?;
        if leading_zero_bits(&id) >= difficulty {
            return Ok(MinerOutcome::Mined {
                draft: candidate,
                nonce,
                iterations: nonce.saturating_add(1),
            });
        }
        nonce = nonce.wrapping_add(1);
    }
}

/// Mines on a blocking worker, racing the search against `timeout`.
///
/// On timeout the worker is cancelled and awaited, then
/// [`Error::PowTimeout`] is surfaced; whether that aborts the publish or
/// merely downgrades it to an unmined event is the caller's policy.
pub async fn mine_with_timeout(
    draft: EventDraft,
    difficulty: u8,
    timeout: Duration,
) -> Result<EventDraft> {
    let started = Instant::now();
    let cancel = Arc::new(AtomicBool::new(false));
    let worker_cancel = Arc::clone(&cancel);
    let mut handle =
        tokio::task::spawn_blocking(move || mine(&draft, difficulty, &worker_cancel));

    let joined = tokio::select! {
        res = &mut handle => res,
        () = tokio::time::sleep(timeout) => {
            cancel.store(true, Ordering::Relaxed);
            handle.await
        }
    };
    let outcome = joined.map_err(|e| Error::MiningTask(e.to_string()))??;

    match outcome {
        MinerOutcome::Mined {
            draft,
            nonce,
            iterations,
        } => {
            counter!("pow_attempts_total", "outcome" => "mined").increment(1);
            debug!(
                difficulty,
                nonce,
                iterations,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "proof-of-work target reached"
            );
            Ok(draft)
        }
        MinerOutcome::Cancelled { iterations } => {
            counter!("pow_attempts_total", "outcome" => "timeout").increment(1);
            debug!(difficulty, iterations, "proof-of-work timed out");
            Err(Error::PowTimeout {
                difficulty,
                elapsed_ms: started.elapsed().as_millis() as u64,
            })
        }
    }
}
