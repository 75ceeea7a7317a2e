//! Fan-out of one content submission into per-account publish targets

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use uuid::Uuid;

use crate::types::{Account, ContentItem, PlatformKind, PublishRecord, PublishTarget};
use crate::validation::{ConstraintTable, ValidationError, ValidationWarning};

/// An account excluded at validation time
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRejection {
    pub account_id: String,
    pub platform: PlatformKind,
    pub error: ValidationError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountWarnings {
    pub account_id: String,
    pub platform: PlatformKind,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Debug, Clone)]
pub struct FanoutPlan {
    /// The record with every new target appended to its active set
    pub record: PublishRecord,
    pub is_new_record: bool,
    pub new_targets: Vec<PublishTarget>,
    /// Accounts that already had a target in the record
    pub skipped: Vec<String>,
    pub rejected: Vec<AccountRejection>,
    pub warnings: Vec<AccountWarnings>,
}

/// Deterministic target id for the `generation`-th target of an account in a record
///
/// Generation 0 is the fan-out target; each manual retry bumps the generation.
pub fn target_id_for(record_id: &str, account_id: &str, generation: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(account_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(generation.to_be_bytes());
    format!("{:x}", hasher.finalize())
}

/// Validate each account and create one pending target per accepted account
///
/// `existing` is the stored record (and all its targets) when `record_id` names a
/// record that already exists; accounts that already have a target there are
/// skipped, so re-running the same submission creates nothing new.
pub fn fanout(
    table: &ConstraintTable,
    content: &ContentItem,
    accounts: &[Account],
    scheduled_at: Option<DateTime<Utc>>,
    record_id: Option<&str>,
    existing: Option<(&PublishRecord, &[PublishTarget])>,
    now: DateTime<Utc>,
) -> FanoutPlan {
    let (mut record, is_new_record, mut seen) = match existing {
        Some((record, targets)) => (
            record.clone(),
            false,
            targets
                .iter()
                .map(|t| t.account_id.clone())
                .collect::<HashSet<_>>(),
        ),
        None => (
            PublishRecord {
                record_id: record_id
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                content_id: content.id.clone(),
                target_ids: Vec::new(),
                created_at: now,
            },
            true,
            HashSet::new(),
        ),
    };

    let mut plan_targets = Vec::new();
    let mut skipped = Vec::new();
    let mut rejected = Vec::new();
    let mut warnings = Vec::new();

    for account in accounts {
        if !seen.insert(account.account_id.clone()) {
            skipped.push(account.account_id.clone());
            continue;
        }

        let report = table.validate(content, account.platform, account.sub_category.as_deref());
        if let Some(error) = report.blocking {
            rejected.push(AccountRejection {
                account_id: account.account_id.clone(),
                platform: account.platform,
                error,
            });
            continue;
        }
        if !report.warnings.is_empty() {
            warnings.push(AccountWarnings {
                account_id: account.account_id.clone(),
                platform: account.platform,
                warnings: report.warnings,
            });
        }

        let target_id = target_id_for(&record.record_id, &account.account_id, 0);
        record.target_ids.push(target_id.clone());
        plan_targets.push(PublishTarget::new(
            target_id,
            record.record_id.clone(),
            account,
            scheduled_at,
            now,
        ));
    }

    FanoutPlan {
        record,
        is_new_record,
        new_targets: plan_targets,
        skipped,
        rejected,
        warnings,
    }
}
