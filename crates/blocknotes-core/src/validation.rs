//! Envelope checks, content sanitization and the spam/invoice filter.
//!
//! Everything here is pure: no I/O, no shared state. Callers decide what to do
//! with a rejected envelope (the feed and enricher drop it with a diagnostic).

use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::kinds;
use crate::models::ValidatedEvent;

/// Largest accepted `content`, in bytes
pub const MAX_CONTENT_BYTES: usize = 64 * 1024;
/// Largest accepted tag count
pub const MAX_TAGS: usize = 2000;
/// How far ahead of local time `created_at` may be
pub const MAX_FUTURE_DRIFT_SECS: u64 = 15 * 60;

/// More mentions or hashtags than this marks a note as spam
const SPAM_TAG_LIMIT: usize = 10;
/// A single character repeated this many times in a row marks a note as spam
const SPAM_RUN_LENGTH: usize = 40;
/// BOLT-11 human readable prefixes (mainnet, testnet, signet, regtest)
const INVOICE_PREFIXES: [&str; 4] = ["lnbc", "lntb", "lntbs", "lnbcrt"];

/// Filter flags owned by the settings collaborator. The core only reads them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSettings {
    pub hide_spam: bool,
    pub hide_invoice: bool,
    /// Drop incoming timeline envelopes before validation
    pub paused: bool,
}

impl FilterSettings {
    /// Short human readable summary, e.g. "Spam: Filtered, Invoices: Displayed"
    pub fn describe(&self) -> String {
        let spam = if self.hide_spam { "Filtered" } else { "Allowed" };
        let invoices = if self.hide_invoice { "Hidden" } else { "Displayed" };
        let mut summary = format!("Spam: {}, Invoices: {}", spam, invoices);
        if self.paused {
            summary.push_str(", Paused");
        }
        summary
    }
}

/// Why an envelope was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unexpected kind {actual}, wanted {expected}")]
    WrongKind { expected: u16, actual: u16 },
    #[error("id or signature does not verify")]
    BadSignature,
    #[error("content too large ({0} bytes)")]
    ContentTooLarge(usize),
    #[error("too many tags ({0})")]
    TooManyTags(usize),
    #[error("created_at {created_at} is too far in the future")]
    FromTheFuture { created_at: u64 },
}

/// Check one envelope against the structural rules for `kind`.
pub fn check_envelope(event: &Event, kind: u16, now: u64) -> Result<(), Rejection> {
    let actual = event.kind.as_u16();
    if actual != kind {
        return Err(Rejection::WrongKind {
            expected: kind,
            actual,
        });
    }
    if event.content.len() > MAX_CONTENT_BYTES {
        return Err(Rejection::ContentTooLarge(event.content.len()));
    }
    if event.tags.len() > MAX_TAGS {
        return Err(Rejection::TooManyTags(event.tags.len()));
    }
    let created_at = event.created_at.as_u64();
    if created_at > now.saturating_add(MAX_FUTURE_DRIFT_SECS) {
        return Err(Rejection::FromTheFuture { created_at });
    }
    // Signature last, it is the expensive check
    event.verify().map_err(|_| Rejection::BadSignature)
}

/// Timeline envelope (kind 1) passes every structural and signature check
pub fn validate_event(event: &Event, now: u64) -> bool {
    validate_kind(event, kinds::TEXT_NOTE, now)
}

/// Profile envelope (kind 0) passes every structural and signature check
pub fn validate_profile(event: &Event, now: u64) -> bool {
    validate_kind(event, kinds::METADATA, now)
}

fn validate_kind(event: &Event, kind: u16, now: u64) -> bool {
    match check_envelope(event, kind, now) {
        Ok(()) => true,
        Err(reason) => {
            tracing::debug!(id = %event.id, %reason, "dropping invalid envelope");
            false
        }
    }
}

/// Strip control characters (keeping newline and tab) and escape `&`, `<`, `>`.
pub fn sanitize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\n' | '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Undo the escaping done by [`sanitize_text`]. Stripped control characters
/// stay stripped.
pub fn unescape_text(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Normalize a timeline envelope into a record. `allowed` starts out `true`;
/// it is decided by [`filter_event`].
pub fn sanitize_event(event: &Event) -> ValidatedEvent {
    ValidatedEvent {
        id: event.id.to_hex(),
        pubkey: event.pubkey.to_hex(),
        kind: event.kind.as_u16(),
        created_at: event.created_at.as_u64(),
        tags: event
            .tags
            .iter()
            .map(|t| t.as_slice().iter().map(|s| sanitize_text(s)).collect())
            .collect(),
        content: sanitize_text(&event.content),
        allowed: true,
    }
}

/// Profile envelopes are sanitized exactly like notes; escaping keeps the
/// JSON content parseable.
pub fn sanitize_profile(event: &Event) -> ValidatedEvent {
    sanitize_event(event)
}

/// Whether `record` may be shown under `settings`.
///
/// `paused` is not consulted: pausing drops envelopes before they reach
/// validation, it never hides what is already buffered.
pub fn filter_event(record: &ValidatedEvent, settings: &FilterSettings) -> bool {
    if settings.hide_spam && is_spam(record) {
        return false;
    }
    if settings.hide_invoice && contains_invoice(&record.content) {
        return false;
    }
    true
}

/// Recompute `allowed` on every record and keep the allowed ones.
pub fn reapply_filter(
    records: impl IntoIterator<Item = ValidatedEvent>,
    settings: &FilterSettings,
) -> Vec<ValidatedEvent> {
    records
        .into_iter()
        .filter_map(|mut record| {
            record.allowed = filter_event(&record, settings);
            record.allowed.then_some(record)
        })
        .collect()
}

pub fn is_spam(record: &ValidatedEvent) -> bool {
    record.tag_count("p") > SPAM_TAG_LIMIT
        || record.tag_count("t") > SPAM_TAG_LIMIT
        || longest_run(&record.content) >= SPAM_RUN_LENGTH
}

pub fn contains_invoice(content: &str) -> bool {
    let lower = content.to_lowercase();
    INVOICE_PREFIXES.iter().any(|prefix| lower.contains(prefix))
}

fn longest_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous = None;
    for c in text.chars() {
        if Some(c) == previous {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}
