use chrono::{DateTime, Utc};
use common::SmsStatus;

use super::SmsError;
use crate::entity::outgoing_sms;

/// A message's status together with exactly the fields that status requires.
///
/// Rows are flat in the store; this is the view the pipeline reasons about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmsState {
    Queued {
        next_attempt_at: DateTime<Utc>,
    },
    Sending {
        claimed_at: DateTime<Utc>,
    },
    Sent {
        sent_at: DateTime<Utc>,
        provider_message_id: String,
    },
    Retrying {
        next_attempt_at: DateTime<Utc>,
    },
    Failed {
        balance_failure: bool,
        dismissed: bool,
    },
    Cancelled,
}

impl SmsState {
    pub fn status(&self) -> SmsStatus {
        match self {
            Self::Queued { .. } => SmsStatus::Queued,
            Self::Sending { .. } => SmsStatus::Sending,
            Self::Sent { .. } => SmsStatus::Sent,
            Self::Retrying { .. } => SmsStatus::Retrying,
            Self::Failed { .. } => SmsStatus::Failed,
            Self::Cancelled => SmsStatus::Cancelled,
        }
    }

    /// When the processor may pick the message up, if ever.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Queued { next_attempt_at } | Self::Retrying { next_attempt_at } => {
                Some(*next_attempt_at)
            }
            _ => None,
        }
    }
}

impl outgoing_sms::Model {
    /// Interpret the row, rejecting field combinations no transition can produce.
    pub fn state(&self) -> Result<SmsState, SmsError> {
        let corrupt = |reason| SmsError::CorruptState {
            id: self.id,
            reason,
        };

        if self.balance_failure && self.status != SmsStatus::Failed {
            return Err(corrupt("balance_failure set on a non-failed message"));
        }

        match self.status {
            SmsStatus::Queued => Ok(SmsState::Queued {
                next_attempt_at: self
                    .next_attempt_at
                    .ok_or_else(|| corrupt("queued without next_attempt_at"))?,
            }),
            SmsStatus::Sending => Ok(SmsState::Sending {
                claimed_at: self
                    .last_attempt_at
                    .ok_or_else(|| corrupt("sending without last_attempt_at"))?,
            }),
            SmsStatus::Sent => match (self.sent_at, &self.provider_message_id) {
                (Some(sent_at), Some(id)) => Ok(SmsState::Sent {
                    sent_at,
                    provider_message_id: id.clone(),
                }),
                _ => Err(corrupt("sent without sent_at or provider_message_id")),
            },
            SmsStatus::Retrying => Ok(SmsState::Retrying {
                next_attempt_at: self
                    .next_attempt_at
                    .ok_or_else(|| corrupt("retrying without next_attempt_at"))?,
            }),
            SmsStatus::Failed => {
                if self.next_attempt_at.is_some() {
                    return Err(corrupt("failed with a scheduled next attempt"));
                }
                Ok(SmsState::Failed {
                    balance_failure: self.balance_failure,
                    dismissed: self.dismissed_at.is_some(),
                })
            }
            SmsStatus::Cancelled => Ok(SmsState::Cancelled),
        }
    }
}
