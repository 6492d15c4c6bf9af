//! Action-code vocabulary
//!
//! The set of canonical codes is closed. Raw labels outside the mapping
//! table resolve to [`ActionCode::Unknown`] rather than failing.

use crate::store::{EventStore, StoreResult};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionCode {
    PickAndRoll,
    Isolation,
    PostUp,
    OffBallScreen,
    Unknown,
}

impl ActionCode {
    /// Every canonical code, in creation order
    pub const ALL: [ActionCode; 5] = [
        ActionCode::PickAndRoll,
        ActionCode::Isolation,
        ActionCode::PostUp,
        ActionCode::OffBallScreen,
        ActionCode::Unknown,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ActionCode::PickAndRoll => "PNR",
            ActionCode::Isolation => "ISO",
            ActionCode::PostUp => "POST",
            ActionCode::OffBallScreen => "OFFBALL",
            ActionCode::Unknown => "UNKNOWN",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ActionCode::PickAndRoll => "Pick & Roll",
            ActionCode::Isolation => "Isolation",
            ActionCode::PostUp => "Post-up",
            ActionCode::OffBallScreen => "Off-Ball Screen",
            ActionCode::Unknown => "Unknown Action",
        }
    }

    /// Parse a canonical code such as `"PNR"`
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Resolve a raw extract label
    ///
    /// Accepts the extract's camelCase and snake_case labels, the display
    /// names used by the stats pages, and the canonical codes themselves.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "pickAndRoll" | "pick_and_roll" | "Pick & Roll" | "Pick-and-Roll" | "PnR" | "PNR" => {
                ActionCode::PickAndRoll
            },
            "isolation" | "Isolation" | "ISO" => ActionCode::Isolation,
            "postUp" | "post_up" | "Post-up" | "Post Up" | "POST" => ActionCode::PostUp,
            "offBallScreen" | "off_ball_screen" | "Off-Ball Screen" | "OFFBALL" => {
                ActionCode::OffBallScreen
            },
            _ => ActionCode::Unknown,
        }
    }
}

impl std::fmt::Display for ActionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Canonical codes mapped to their dictionary row ids
#[derive(Debug, Clone, Default)]
pub struct ActionDictionary {
    ids: HashMap<ActionCode, i32>,
}

impl ActionDictionary {
    /// Make sure a row exists for every canonical code
    ///
    /// Returns the dictionary and how many rows this call created.
    pub async fn ensure<S: EventStore + ?Sized>(store: &S) -> StoreResult<(Self, u64)> {
        let mut ids = HashMap::with_capacity(ActionCode::ALL.len());
        let mut created = 0;

        for code in ActionCode::ALL {
            let (row, was_created) = store
                .get_or_create_action(code.code(), code.display_name())
                .await?;
            if was_created {
                info!(code = %code, name = code.display_name(), "Created action");
                created += 1;
            }
            ids.insert(code, row.id);
        }

        Ok((Self { ids }, created))
    }

    /// Read the existing dictionary without creating anything
    ///
    /// Rows whose code is outside the canonical set are ignored.
    pub async fn load<S: EventStore + ?Sized>(store: &S) -> StoreResult<Self> {
        let ids = store
            .load_actions()
            .await?
            .into_iter()
            .filter_map(|row| ActionCode::from_code(&row.code).map(|code| (code, row.id)))
            .collect::<HashMap<_, _>>();
        debug!(actions = ids.len(), "Loaded action dictionary");
        Ok(Self { ids })
    }

    pub fn resolve(label: &str) -> ActionCode {
        ActionCode::from_label(label)
    }

    pub fn id_for(&self, code: ActionCode) -> Option<i32> {
        self.ids.get(&code).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
