//! Offline repair of persisted messages.
//!
//! The policy is an ordered list of tagged rules; the first rule whose
//! condition holds decides the action. No rule needs a private key: envelope
//! health is judged from structure alone via the codec.
//!
//! Each action is one `apply_patch` per record, committed on its own, so an
//! interrupted run loses at most the record in flight. Every rule's action
//! moves the record out of that rule's condition, which makes re-running a
//! no-op.
//!
//! With a backup store attached, a record is backed up before any patch that
//! clears its envelopes. A failed backup aborts the run before that patch.

use serde::Serialize;
use tracing::{info, warn};

use lp_proto::{
    message::{is_legacy_placeholder, IRRECOVERABLE_PLACEHOLDER},
    EnvelopeSlot, Message,
};

use crate::{
    backup::{BackupReason, BackupStore},
    error::StoreError,
    store::{MessagePatch, MessageStore, ScanFilter},
};

pub const DEFAULT_BATCH_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Flagged encrypted, no usable envelope, but plaintext content present.
    LegacyPlaintext,
    /// Flagged encrypted, no usable envelope, no content.
    Irrecoverable,
    /// Content is an older placeholder string.
    StalePlaceholder,
    /// At least one structurally valid envelope.
    Healthy,
}

/// Outcome of evaluating the policy against one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Repair { rule: RuleKind, patch: MessagePatch },
    Healthy,
    /// Envelopes are well-formed under a suite this build does not know.
    UnsupportedAlgorithm,
    /// No rule matched; the record is left alone.
    Untouched,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub scanned: u64,
    pub healthy: u64,
    pub normalized_placeholder: u64,
    pub marked_unencrypted: u64,
    pub irrecoverable: u64,
    pub unsupported_algorithm: u64,
    /// Backups newly written ahead of envelope-clearing patches.
    pub backed_up: u64,
}

impl RepairReport {
    /// Records that were (or in dry-run, would be) written.
    pub fn changes(&self) -> u64 {
        self.normalized_placeholder + self.marked_unencrypted + self.irrecoverable
    }

    fn record(&mut self, rule: RuleKind) {
        match rule {
            RuleKind::LegacyPlaintext => self.marked_unencrypted += 1,
            RuleKind::Irrecoverable => self.irrecoverable += 1,
            RuleKind::StalePlaceholder => self.normalized_placeholder += 1,
            RuleKind::Healthy => self.healthy += 1,
        }
    }
}

/// A record with both envelope slots already classified.
struct Inspection<'a> {
    message: &'a Message,
    recipient: EnvelopeSlot,
    sender: EnvelopeSlot,
}

impl<'a> Inspection<'a> {
    fn new(message: &'a Message) -> Self {
        Self { message, recipient: message.recipient_slot(), sender: message.sender_slot() }
    }

    fn no_usable_envelope(&self) -> bool {
        self.recipient.is_empty_or_corrupt() && self.sender.is_empty_or_corrupt()
    }

    fn content_empty(&self) -> bool {
        self.message.content.is_empty()
    }

    fn any_unknown_suite(&self) -> bool {
        matches!(self.recipient, EnvelopeSlot::UnknownSuite(_))
            || matches!(self.sender, EnvelopeSlot::UnknownSuite(_))
    }
}

struct Rule {
    kind: RuleKind,
    applies: fn(&Inspection<'_>) -> bool,
}

fn legacy_plaintext(i: &Inspection<'_>) -> bool {
    i.message.encrypted && i.no_usable_envelope() && !i.content_empty()
}

fn irrecoverable(i: &Inspection<'_>) -> bool {
    i.message.encrypted && i.no_usable_envelope() && i.content_empty()
}

fn stale_placeholder(i: &Inspection<'_>) -> bool {
    is_legacy_placeholder(&i.message.content)
}

fn healthy(i: &Inspection<'_>) -> bool {
    i.message.encrypted && (i.recipient.is_valid() || i.sender.is_valid())
}

/// Evaluated in order; first match wins.
const POLICY: &[Rule] = &[
    Rule { kind: RuleKind::LegacyPlaintext, applies: legacy_plaintext },
    Rule { kind: RuleKind::Irrecoverable, applies: irrecoverable },
    Rule { kind: RuleKind::StalePlaceholder, applies: stale_placeholder },
    Rule { kind: RuleKind::Healthy, applies: healthy },
];

fn canonical_content(content: &str) -> String {
    if is_legacy_placeholder(content) {
        IRRECOVERABLE_PLACEHOLDER.to_string()
    } else {
        content.to_string()
    }
}

/// Decide what, if anything, repair would do to `message`. Pure.
pub fn plan_repair(message: &Message) -> Verdict {
    let inspection = Inspection::new(message);
    let Some(rule) = POLICY.iter().find(|r| (r.applies)(&inspection)) else {
        return if inspection.any_unknown_suite() {
            Verdict::UnsupportedAlgorithm
        } else {
            Verdict::Untouched
        };
    };

    let patch = match rule.kind {
        // A legacy placeholder here is normalised in the same write, so the
        // stale-placeholder rule never has to touch this record again.
        RuleKind::LegacyPlaintext => MessagePatch {
            encrypted: false,
            content: canonical_content(&message.content),
            clear_envelopes: true,
        },
        RuleKind::Irrecoverable => MessagePatch {
            encrypted: false,
            content: IRRECOVERABLE_PLACEHOLDER.to_string(),
            clear_envelopes: true,
        },
        RuleKind::StalePlaceholder => MessagePatch {
            encrypted: message.encrypted,
            content: IRRECOVERABLE_PLACEHOLDER.to_string(),
            clear_envelopes: false,
        },
        RuleKind::Healthy => return Verdict::Healthy,
    };
    Verdict::Repair { rule: rule.kind, patch }
}

pub struct RepairEngine<'a> {
    store: &'a dyn MessageStore,
    backups: Option<&'a dyn BackupStore>,
    batch_size: usize,
}

impl<'a> RepairEngine<'a> {
    pub fn new(store: &'a dyn MessageStore) -> Self {
        Self { store, backups: None, batch_size: DEFAULT_BATCH_SIZE }
    }

    pub fn with_backup(mut self, backups: &'a dyn BackupStore) -> Self {
        self.backups = Some(backups);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Walk every repair candidate once. With `dry_run` nothing is written
    /// and the report counts what would have changed.
    pub async fn scan_and_repair(&self, dry_run: bool) -> Result<RepairReport, StoreError> {
        let mut report = RepairReport::default();
        let mut cursor: Option<String> = None;

        info!(
            dry_run,
            batch_size = self.batch_size,
            backups = self.backups.is_some(),
            "Repair scan starting"
        );

        loop {
            let page = self
                .store
                .scan(ScanFilter::RepairCandidates, cursor.as_deref(), self.batch_size)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some(last.id.clone());

            for message in &page {
                report.scanned += 1;
                match plan_repair(message) {
                    Verdict::Repair { rule, patch } => {
                        if !dry_run && patch.clear_envelopes {
                            if let Some(backups) = self.backups {
                                if backups.backup(message, BackupReason::EncryptionMigration).await? {
                                    report.backed_up += 1;
                                }
                            }
                        }
                        if !dry_run && !self.store.apply_patch(&message.id, &patch).await? {
                            warn!(id = %message.id, "Record vanished before repair; skipping");
                            continue;
                        }
                        info!(id = %message.id, ?rule, dry_run, "Repair action");
                        report.record(rule);
                    }
                    Verdict::Healthy | Verdict::Untouched => report.healthy += 1,
                    Verdict::UnsupportedAlgorithm => {
                        warn!(id = %message.id, "Envelope uses an unsupported algorithm; left untouched");
                        report.unsupported_algorithm += 1;
                    }
                }
            }

            if page.len() < self.batch_size {
                break;
            }
        }

        info!(
            dry_run,
            scanned = report.scanned,
            healthy = report.healthy,
            normalized_placeholder = report.normalized_placeholder,
            marked_unencrypted = report.marked_unencrypted,
            irrecoverable = report.irrecoverable,
            unsupported_algorithm = report.unsupported_algorithm,
            backed_up = report.backed_up,
            "Repair scan finished"
        );
        Ok(report)
    }
}
