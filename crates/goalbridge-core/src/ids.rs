//! Identifier space: game-local ids per category ⇄ one flat global id space.
//!
//! Every category owns a contiguous, statically declared sub-range above
//! [`GAME_ID_BASE`]. Adding a category means extending [`Category`] and
//! [`Category::range`]; nothing else branches on the category set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// First global id owned by this game.
pub const GAME_ID_BASE: u64 = 741_000_000;

/// Category-scoped id as it appears in game memory or in a command.
pub type LocalId = u32;

/// Id in the coordination service's flat namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(pub u64);

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Category ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Power cells.
    Collectible,
    /// Scout flies.
    #[serde(rename = "subcollectible")]
    SubCollectible,
    /// Special one-off unlocks.
    Milestone,
    /// Precursor orb bundles (orbsanity only).
    OrbBundle,
}

/// Offset from [`GAME_ID_BASE`] and number of ids a category owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub offset: u64,
    pub span: u64,
}

impl IdRange {
    fn contains(self, global: u64) -> bool {
        let start = GAME_ID_BASE + self.offset;
        global >= start && global < start + self.span
    }
}

impl Category {
    pub const ALL: [Self; 4] = [
        Self::Collectible,
        Self::SubCollectible,
        Self::Milestone,
        Self::OrbBundle,
    ];

    pub const fn range(self) -> IdRange {
        match self {
            Self::Collectible => IdRange {
                offset: 0,
                span: 1024,
            },
            Self::SubCollectible => IdRange {
                offset: 1024,
                span: 1024,
            },
            Self::Milestone => IdRange {
                offset: 2048,
                span: 2048,
            },
            Self::OrbBundle => IdRange {
                offset: 4096,
                span: 2048,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collectible => "collectible",
            Self::SubCollectible => "subcollectible",
            Self::Milestone => "milestone",
            Self::OrbBundle => "orb_bundle",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

// ─── Translation ──────────────────────────────────────────────────

/// Scout flies are stored in game memory as `fly_index << 16 | cell_id`.
/// Inside the global range they are packed as `fly_index << 7 | cell_id`.
const FLY_INDEX_SHIFT: u32 = 16;
const FLY_PACKED_SHIFT: u32 = 7;
const FLY_CELL_MASK: u32 = (1 << FLY_PACKED_SHIFT) - 1;

impl Category {
    /// Position of a game-local id inside this category's range.
    fn encode(self, local_id: LocalId) -> Option<u64> {
        let offset = match self {
            Self::SubCollectible => {
                let cell = local_id & 0xFFFF;
                let fly_index = local_id >> FLY_INDEX_SHIFT;
                if cell > FLY_CELL_MASK {
                    return None;
                }
                u64::from((fly_index << FLY_PACKED_SHIFT) | cell)
            }
            Self::Collectible | Self::Milestone | Self::OrbBundle => u64::from(local_id),
        };
        (offset < self.range().span).then_some(offset)
    }

    /// Inverse of [`Category::encode`] for an offset inside the span.
    fn decode(self, offset: u64) -> Option<LocalId> {
        let offset = LocalId::try_from(offset).ok()?;
        Some(match self {
            Self::SubCollectible => {
                ((offset >> FLY_PACKED_SHIFT) << FLY_INDEX_SHIFT) | (offset & FLY_CELL_MASK)
            }
            Self::Collectible | Self::Milestone | Self::OrbBundle => offset,
        })
    }
}

/// Translate a game-local id into the global namespace.
pub fn to_global(category: Category, local_id: LocalId) -> Result<GlobalId, SyncError> {
    let offset = category
        .encode(local_id)
        .ok_or(SyncError::UnknownLocalIdentifier { category, local_id })?;
    Ok(GlobalId(GAME_ID_BASE + category.range().offset + offset))
}

/// Translate a global id back to its category and game-local id.
pub fn to_local(global: GlobalId) -> Result<(Category, LocalId), SyncError> {
    let category = Category::ALL
        .into_iter()
        .find(|c| c.range().contains(global.0))
        .ok_or(SyncError::UnknownIdentifier(global.0))?;
    let local = category
        .decode(global.0 - GAME_ID_BASE - category.range().offset)
        .ok_or(SyncError::UnknownIdentifier(global.0))?;
    Ok((category, local))
}
