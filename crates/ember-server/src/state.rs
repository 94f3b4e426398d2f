//! Machine lifecycle
//!
//! Five states, one owner: every machine is in exactly one state and only
//! the transitions below happen. Operator actions are guarded here; the
//! automatic transitions (`queued → provisioning` on boot-script serve,
//! `provisioning → ready` on callback) live with their triggers and go
//! through the store's conditional update.

use crate::store::System;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    /// Seen on the network, nothing assigned yet
    Discovered,
    /// Image + hostname set, will provision on next boot
    Queued,
    /// Boot script served, installer running
    Provisioning,
    /// Installer called back; machine is done
    Ready,
    /// Operator marked the provisioning attempt failed
    Failed,
}

impl SystemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Discovered => "discovered",
            SystemState::Queued => "queued",
            SystemState::Provisioning => "provisioning",
            SystemState::Ready => "ready",
            SystemState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(SystemState::Discovered),
            "queued" => Some(SystemState::Queued),
            "provisioning" => Some(SystemState::Provisioning),
            "ready" => Some(SystemState::Ready),
            "failed" => Some(SystemState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-requested state actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorAction {
    Queue,
    Cancel,
    Retry,
    MarkFailed,
    Reimage,
}

/// Guard violation: the action does not apply to the machine's state
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot {action} from state {current}")]
    WrongState {
        action: &'static str,
        current: String,
    },

    #[error("image and hostname must be set before queuing")]
    NotProvisionable,

    #[error("unknown action: {0}")]
    UnknownAction(String),
}

/// Apply an operator action's guard and compute the target state.
/// The caller persists the result and fires the event.
pub fn apply_action(sys: &System, action: OperatorAction) -> Result<SystemState, StateError> {
    let current = sys.state.as_str();
    match action {
        OperatorAction::Queue => {
            if !matches!(current, "discovered" | "ready" | "failed") {
                return Err(StateError::WrongState {
                    action: "queue",
                    current: sys.state.clone(),
                });
            }
            if sys.image_id.is_none() || sys.hostname.is_empty() {
                return Err(StateError::NotProvisionable);
            }
            Ok(SystemState::Queued)
        }
        OperatorAction::Cancel => {
            if current != "queued" {
                return Err(StateError::WrongState {
                    action: "cancel",
                    current: sys.state.clone(),
                });
            }
            // A machine that was provisioned before keeps its ready badge
            if sys.hostname.is_empty() {
                Ok(SystemState::Discovered)
            } else {
                Ok(SystemState::Ready)
            }
        }
        OperatorAction::Retry => {
            if current != "failed" {
                return Err(StateError::WrongState {
                    action: "retry",
                    current: sys.state.clone(),
                });
            }
            Ok(SystemState::Queued)
        }
        OperatorAction::MarkFailed => {
            if current != "provisioning" {
                return Err(StateError::WrongState {
                    action: "mark_failed",
                    current: sys.state.clone(),
                });
            }
            Ok(SystemState::Failed)
        }
        OperatorAction::Reimage => {
            if current != "ready" {
                return Err(StateError::WrongState {
                    action: "reimage",
                    current: sys.state.clone(),
                });
            }
            Ok(SystemState::Queued)
        }
    }
}
