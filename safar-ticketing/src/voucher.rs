//! Voucher metadata codec and cash redemption planning.
//!
//! The voucher table has no columns for monetary metadata, so the amount,
//! balance and provenance are serialized as JSON and appended to the
//! human-readable notes inside a `[META:{...}]` block. The same field is
//! both a display string and a serialized struct; the legacy encoding is
//! preserved for read compatibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use safar_core::plan::{RedemptionCommit, TransactionDraft};
use safar_core::{Error, Result};
use safar_shared::models::{TransactionType, Voucher};

pub const META_MARKER: &str = "[META:";
pub const REFUNDED_CASH_MARKER: &str = "[REFUNDED_CASH]";

pub const CATEGORY_COMPENSATION: &str = "COMPENSATION";
pub const CATEGORY_PERSONAL: &str = "PERSONAL";
pub const TYPE_COMP_CANCEL: &str = "COMP_CANCEL";
pub const TYPE_COMP_NO_SHOW: &str = "COMP_NO_SHOW";

/// Transaction category for cash redemptions.
pub const TX_CATEGORY_VOUCHER_REFUND: &str = "VOUCHER_REFUND";

fn default_category() -> String {
    CATEGORY_PERSONAL.to_string()
}

fn default_discount() -> i64 {
    100
}

fn default_max_uses() -> i64 {
    1
}

/// Structured metadata embedded in a voucher's notes. Field names are
/// camelCase on the wire to match the legacy records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoucherMeta {
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub balance: i64,
    /// Defaults to the voucher's stored type when absent.
    #[serde(default)]
    pub real_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ticket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default = "default_discount")]
    pub discount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default = "default_max_uses")]
    pub max_uses: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
}

impl VoucherMeta {
    /// Defaults used whenever decoding fails or no marker is present.
    pub fn fallback(stored_type: &str) -> Self {
        Self {
            category: default_category(),
            amount: 0,
            balance: 0,
            real_type: stored_type.to_string(),
            source_ticket_id: None,
            reason: None,
            discount: default_discount(),
            location: None,
            code: None,
            max_uses: default_max_uses(),
            expiry_date: None,
        }
    }
}

/// Serialize metadata after a human-readable prefix:
/// `"<prefix> [META:{...}]"`.
pub fn encode(prefix: &str, meta: &VoucherMeta) -> String {
    let json = serde_json::to_string(meta).unwrap_or_else(|_| "{}".to_string());
    format!("{} {}{}]", prefix, META_MARKER, json)
}

/// Decode the metadata block out of a notes string. Never fails: a missing
/// marker or malformed JSON falls back to [`VoucherMeta::fallback`] with
/// the voucher's stored type as `real_type`. Markers appended after the
/// block (e.g. `[REFUNDED_CASH]`) do not disturb decoding.
pub fn decode(notes: &str, stored_type: &str) -> VoucherMeta {
    let Some(start) = notes.find(META_MARKER) else {
        return VoucherMeta::fallback(stored_type);
    };
    let rest = &notes[start + META_MARKER.len()..];
    let Some(end) = rest.rfind('}') else {
        return VoucherMeta::fallback(stored_type);
    };
    match serde_json::from_str::<VoucherMeta>(&rest[..=end]) {
        Ok(mut meta) => {
            if meta.real_type.is_empty() {
                meta.real_type = stored_type.to_string();
            }
            meta
        }
        Err(_) => VoucherMeta::fallback(stored_type),
    }
}

/// The human-readable part of a notes field (everything before the marker).
pub fn human_note(notes: &str) -> &str {
    match notes.find(META_MARKER) {
        Some(idx) => notes[..idx].trim_end(),
        None => notes.trim_end(),
    }
}

/// Validate a voucher for cash redemption and build the atomic commit:
/// a negative WITHDRAWAL transaction for the cash leaving the system plus
/// the used-marker appended to the notes. No state is touched here.
pub fn plan_redemption(voucher: &Voucher, extra_notes: Option<&str>) -> Result<RedemptionCommit> {
    if voucher.is_used {
        return Err(Error::InvalidState(format!(
            "voucher {} already used",
            voucher.id
        )));
    }
    let meta = decode(&voucher.notes, &voucher.voucher_type);
    if meta.balance <= 0 {
        return Err(Error::InvalidState(format!(
            "voucher {} has no redeemable balance",
            voucher.id
        )));
    }

    let mut notes_suffix = format!(" {}", REFUNDED_CASH_MARKER);
    if let Some(extra) = extra_notes {
        if !extra.is_empty() {
            notes_suffix.push(' ');
            notes_suffix.push_str(extra);
        }
    }

    Ok(RedemptionCommit {
        voucher_id: voucher.id,
        transaction: TransactionDraft {
            tx_type: TransactionType::Withdrawal,
            category: TX_CATEGORY_VOUCHER_REFUND.to_string(),
            amount: -meta.balance,
            applicant_id: None,
            notes: Some(format!("Cash refund of voucher {}", voucher.id)),
        },
        notes_suffix,
    })
}
