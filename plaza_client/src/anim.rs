//! Animation selection.
//!
//! Local (after reconciliation) and remote (after interpolation) entities go
//! through the same precedence: dance, then run, then the idle frame.

use std::fmt;

use plaza_shared::net::{Direction, SemanticState};

/// Dance played when the server names none.
pub const DEFAULT_DANCE: &str = "dance1";

/// Texture atlas every clip draws from.
pub const ATLAS: &str = "me";

/// What the presentation should show for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AnimationKey {
    /// Looping run cycle.
    Run(Direction),
    /// Static frame, animation stopped.
    Idle(Direction),
    /// Looping dance, by variant name.
    Dance(String),
}

impl AnimationKey {
    pub fn is_looping(&self) -> bool {
        !matches!(self, AnimationKey::Idle(_))
    }

    /// Name of the clip, or of the frame for idle keys.
    pub fn name(&self) -> String {
        match self {
            AnimationKey::Run(dir) => format!("run-{dir}"),
            AnimationKey::Idle(dir) => idle_frame(*dir).to_string(),
            AnimationKey::Dance(variant) => variant.clone(),
        }
    }
}

impl fmt::Display for AnimationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Atlas frame shown while standing still.
pub fn idle_frame(dir: Direction) -> &'static str {
    match dir {
        Direction::Left => "me-4.png",
        Direction::Right => "me-8.png",
        Direction::Up => "me-13.png",
        Direction::Down => "me-0.png",
    }
}

/// Everything the resolver looks at.
#[derive(Debug, Clone, Copy)]
pub struct PoseInputs<'a> {
    pub semantic: SemanticState,
    pub dance_variant: Option<&'a str>,
    pub direction: Direction,
    /// Kinematic motion, already widened by the caller's local or remote rule.
    pub moving: bool,
}

pub fn resolve(p: &PoseInputs<'_>) -> AnimationKey {
    if p.semantic == SemanticState::Dance {
        AnimationKey::Dance(p.dance_variant.unwrap_or(DEFAULT_DANCE).to_string())
    } else if p.moving {
        AnimationKey::Run(p.direction)
    } else {
        AnimationKey::Idle(p.direction)
    }
}

/// Frame list and playback rate of a clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub frames: Vec<String>,
    pub frame_rate: u32,
    pub looping: bool,
}

fn frames(indices: impl IntoIterator<Item = u32>) -> Vec<String> {
    indices
        .into_iter()
        .map(|i| format!("{ATLAS}-{i}.png"))
        .collect()
}

/// Clip table for every key the resolver can produce. Unknown dance variants
/// fall back to the default dance.
pub fn clip(key: &AnimationKey) -> Clip {
    match key {
        AnimationKey::Run(dir) => {
            let start = match dir {
                Direction::Down => 0,
                Direction::Left => 4,
                Direction::Right => 8,
                Direction::Up => 13,
            };
            Clip {
                frames: frames(start..start + 4),
                frame_rate: 10,
                looping: true,
            }
        }
        AnimationKey::Idle(dir) => Clip {
            frames: vec![idle_frame(*dir).to_string()],
            frame_rate: 0,
            looping: false,
        },
        AnimationKey::Dance(variant) => match variant.as_str() {
            "dance2" => Clip {
                frames: frames([0, 8, 13, 4]),
                frame_rate: 12,
                looping: true,
            },
            "dance3" => Clip {
                frames: frames([1, 2, 1, 0, 5, 6, 5, 4]),
                frame_rate: 10,
                looping: true,
            },
            _ => Clip {
                frames: frames([0, 4, 8, 13]),
                frame_rate: 8,
                looping: true,
            },
        },
    }
}
