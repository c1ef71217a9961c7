//! Status Snapshots
//!
//! What the peer displays, and how it is derived from the host's state.
//!
//! # Composition
//!
//! ```text
//! ┌──────────┐  ┌─────────────────┐  ┌───────────────┐
//! │ HostInfo │  │ PresenceOptions │  │ RenderContext │
//! └────┬─────┘  └────────┬────────┘  └───────┬───────┘
//!      └────────────────┼───────────────────┘
//!                       ▼
//!                 compose(...) ──► StatusSnapshot ──► Activity (wire)
//! ```

use crate::config::{PresenceOptions, RenderingDisplayMode};
use crate::protocol::{Activity, Assets, Timestamps};

/// Current wall-clock time in epoch seconds
#[must_use]
pub fn now_epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

// =============================================================================
// Snapshot
// =============================================================================

/// One complete status, built fresh for every update
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// First line
    pub details: String,
    /// Second line
    pub state: String,
    /// Elapsed-time origin (epoch seconds)
    pub start_timestamp: Option<i64>,
    /// Asset key of the large image
    pub large_image_key: String,
    /// Hover text of the large image
    pub large_image_text: String,
}

impl StatusSnapshot {
    /// Snapshot with just the two text lines
    #[must_use]
    pub fn new(details: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            details: details.into(),
            state: state.into(),
            ..Default::default()
        }
    }

    /// Set the elapsed-time origin
    #[must_use]
    pub fn with_start(mut self, start: i64) -> Self {
        self.start_timestamp = Some(start);
        self
    }

    /// Set the large image and its hover text
    #[must_use]
    pub fn with_large_image(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.large_image_key = key.into();
        self.large_image_text = text.into();
        self
    }
}

impl From<&StatusSnapshot> for Activity {
    fn from(snapshot: &StatusSnapshot) -> Self {
        let assets = Assets {
            large_image: snapshot.large_image_key.clone(),
            large_text: snapshot.large_image_text.clone(),
        };
        Self {
            state: snapshot.state.clone(),
            details: snapshot.details.clone(),
            timestamps: snapshot
                .start_timestamp
                .map(|start| Timestamps { start: Some(start) }),
            assets: (!assets.is_empty()).then_some(assets),
        }
    }
}

impl From<Activity> for StatusSnapshot {
    fn from(activity: Activity) -> Self {
        let assets = activity.assets.unwrap_or_default();
        Self {
            details: activity.details,
            state: activity.state,
            start_timestamp: activity.timestamps.and_then(|t| t.start),
            large_image_key: assets.large_image,
            large_image_text: assets.large_text,
        }
    }
}

// =============================================================================
// Render Context
// =============================================================================

/// State of an in-progress render job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderContext {
    /// When the job started (epoch seconds)
    pub start: i64,
    /// Frames completed so far
    pub rendered_frames: u32,
}

impl RenderContext {
    /// A render job starting at `start`
    #[must_use]
    pub fn new(start: i64) -> Self {
        Self {
            start,
            rendered_frames: 0,
        }
    }

    /// Record a completed frame
    pub fn frame_rendered(&mut self) {
        self.rendered_frames = self.rendered_frames.saturating_add(1);
    }

    /// Whether more than one frame is being produced
    ///
    /// A still render completes no frames before the job ends.
    #[must_use]
    pub fn is_animation(&self) -> bool {
        self.rendered_frames > 0
    }
}

// =============================================================================
// Host Information
// =============================================================================

/// Scene frame bounds and cursor
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameRange {
    /// First frame of the scene
    pub start: i32,
    /// Last frame of the scene
    pub end: i32,
    /// Frame currently under the cursor
    pub current: i32,
}

impl FrameRange {
    /// `(position, total)`, both 1-based
    #[must_use]
    pub fn position(&self) -> (i32, i32) {
        (self.current - self.start + 1, self.end - self.start + 1)
    }
}

/// Host application version
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Release cycle (`release`, `rc`, `beta`, `alpha`)
    pub cycle: String,
}

impl HostVersion {
    /// Version triple
    #[must_use]
    pub fn new(major: u32, minor: u32, cycle: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            cycle: cycle.into(),
        }
    }

    /// Human-readable label, e.g. `"4.2 Release"`
    #[must_use]
    pub fn label(&self) -> String {
        let cycle = match self.cycle.as_str() {
            "release" => "Release",
            "rc" => "Release Candidate",
            "beta" => "Beta",
            "alpha" => "Alpha",
            _ => "",
        };
        format!("{}.{} {}", self.major, self.minor, cycle)
            .trim_end()
            .to_string()
    }
}

/// What the host application can tell us about its current state
pub trait HostInfo {
    /// Display name of the open file; `None` when unsaved
    fn file_name(&self) -> Option<String>;

    /// Internal render engine identifier, e.g. `BLENDER_EEVEE_NEXT`
    fn render_engine(&self) -> String;

    /// Scene frame bounds
    fn frame_range(&self) -> FrameRange;

    /// Application version
    fn version(&self) -> HostVersion;
}

/// Fixed host state, for probes and tests
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticHostInfo {
    /// See `HostInfo::file_name`
    pub file_name: Option<String>,
    /// See `HostInfo::render_engine`
    pub render_engine: String,
    /// See `HostInfo::frame_range`
    pub frame_range: FrameRange,
    /// See `HostInfo::version`
    pub version: HostVersion,
}

impl HostInfo for StaticHostInfo {
    fn file_name(&self) -> Option<String> {
        self.file_name.clone().filter(|name| !name.is_empty())
    }

    fn render_engine(&self) -> String {
        self.render_engine.clone()
    }

    fn frame_range(&self) -> FrameRange {
        self.frame_range
    }

    fn version(&self) -> HostVersion {
        self.version.clone()
    }
}

/// Readable engine name: `BLENDER_EEVEE_NEXT` → `Eevee Next`
#[must_use]
pub fn engine_display_name(internal: &str) -> String {
    internal
        .replace("BLENDER_", "")
        .split('_')
        .filter(|word| !word.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

// =============================================================================
// Composition
// =============================================================================

/// Build the snapshot for the current host state
///
/// `session_start` is the elapsed-time origin while editing; the render
/// context supplies it while rendering.
#[must_use]
pub fn compose(
    host: &dyn HostInfo,
    options: &PresenceOptions,
    render: Option<&RenderContext>,
    session_start: i64,
    large_image_key: &str,
) -> StatusSnapshot {
    let file_name = host.file_name();

    let (details, state) = match render {
        Some(ctx) => {
            let details = match (options.rendering_display_mode, &file_name) {
                (RenderingDisplayMode::ByFileName, Some(name)) => format!("Rendering {name}"),
                _ => format!("Rendering in {}", engine_display_name(&host.render_engine())),
            };
            let state = if ctx.is_animation() {
                let (position, total) = host.frame_range().position();
                format!("Frame {position} of {total}")
            } else {
                "Single Frame".to_string()
            };
            (details, state)
        }
        None => match file_name {
            Some(name) => ("Editing a project".to_string(), name),
            None => ("Editing an unsaved file".to_string(), String::new()),
        },
    };

    let start_timestamp = match render {
        None if options.show_elapsed_time => Some(session_start),
        Some(ctx) if options.show_elapsed_time_while_rendering => Some(ctx.start),
        _ => None,
    };

    StatusSnapshot {
        details,
        state,
        start_timestamp,
        large_image_key: large_image_key.to_string(),
        large_image_text: host.version().label(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn host(file: Option<&str>) -> StaticHostInfo {
        StaticHostInfo {
            file_name: file.map(str::to_string),
            render_engine: "CYCLES".to_string(),
            frame_range: FrameRange {
                start: 1,
                end: 250,
                current: 12,
            },
            version: HostVersion::new(4, 2, "release"),
        }
    }

    #[test]
    fn test_editing_saved_file() {
        let snapshot = compose(
            &host(Some("scene")),
            &PresenceOptions::default(),
            None,
            1_000,
            "blender",
        );
        assert_eq!(
            snapshot,
            StatusSnapshot {
                details: "Editing a project".to_string(),
                state: "scene".to_string(),
                start_timestamp: Some(1_000),
                large_image_key: "blender".to_string(),
                large_image_text: "4.2 Release".to_string(),
            }
        );
    }

    #[test]
    fn test_editing_unsaved_file() {
        let snapshot = compose(&host(None), &PresenceOptions::default(), None, 1_000, "blender");
        assert_eq!(snapshot.details, "Editing an unsaved file");
        assert_eq!(snapshot.state, "");
    }

    #[test]
    fn test_rendering_single_frame_by_engine() {
        let render = RenderContext::new(2_000);
        let snapshot = compose(
            &host(Some("scene")),
            &PresenceOptions::default(),
            Some(&render),
            1_000,
            "blender",
        );
        assert_eq!(snapshot.details, "Rendering in Cycles");
        assert_eq!(snapshot.state, "Single Frame");
        assert_eq!(snapshot.start_timestamp, Some(2_000));
    }

    #[test]
    fn test_rendering_animation_by_file_name() {
        let mut render = RenderContext::new(2_000);
        render.frame_rendered();
        let options = PresenceOptions {
            rendering_display_mode: RenderingDisplayMode::ByFileName,
            ..Default::default()
        };

        let snapshot = compose(&host(Some("scene")), &options, Some(&render), 1_000, "blender");
        assert_eq!(snapshot.details, "Rendering scene");
        assert_eq!(snapshot.state, "Frame 12 of 250");
    }

    #[test]
    fn test_by_file_name_falls_back_to_engine_when_unsaved() {
        let options = PresenceOptions {
            rendering_display_mode: RenderingDisplayMode::ByFileName,
            ..Default::default()
        };
        let render = RenderContext::new(0);
        let snapshot = compose(&host(None), &options, Some(&render), 0, "blender");
        assert_eq!(snapshot.details, "Rendering in Cycles");
    }

    #[test]
    fn test_elapsed_time_options() {
        let hide_all = PresenceOptions {
            show_elapsed_time: false,
            show_elapsed_time_while_rendering: false,
            ..Default::default()
        };
        let render = RenderContext::new(2_000);

        assert_eq!(
            compose(&host(Some("a")), &hide_all, None, 1_000, "b").start_timestamp,
            None
        );
        assert_eq!(
            compose(&host(Some("a")), &hide_all, Some(&render), 1_000, "b").start_timestamp,
            None
        );
    }

    #[test]
    fn test_engine_display_name() {
        assert_eq!(engine_display_name("BLENDER_EEVEE_NEXT"), "Eevee Next");
        assert_eq!(engine_display_name("BLENDER_WORKBENCH"), "Workbench");
        assert_eq!(engine_display_name("CYCLES"), "Cycles");
        assert_eq!(engine_display_name("octane"), "Octane");
    }

    #[test]
    fn test_version_label() {
        assert_eq!(HostVersion::new(4, 2, "release").label(), "4.2 Release");
        assert_eq!(HostVersion::new(5, 0, "rc").label(), "5.0 Release Candidate");
        assert_eq!(HostVersion::new(4, 3, "beta").label(), "4.3 Beta");
        assert_eq!(HostVersion::new(4, 4, "alpha").label(), "4.4 Alpha");
        assert_eq!(HostVersion::new(4, 4, "custom").label(), "4.4");
    }

    #[test]
    fn test_snapshot_survives_the_wire() {
        use crate::protocol::Command;
        use crate::transport::{decode, encode, Opcode};

        let snapshots = [
            StatusSnapshot::default(),
            StatusSnapshot::new("Editing a project", "scene.blend"),
            StatusSnapshot::new("Editing a project", "scene.blend").with_start(1_700_000_000),
            StatusSnapshot::new("Rendering in Cycles", "Single Frame").with_start(0),
            StatusSnapshot::new("Rendering in Cycles", "Frame 3 of 250").with_start(-86_400),
            StatusSnapshot::new("", "").with_large_image("blender", ""),
            StatusSnapshot::new("", "").with_large_image("", "4.2 Release"),
            StatusSnapshot::new("Editing a project", "")
                .with_large_image("blender", "4.2 Release Candidate"),
            StatusSnapshot::new("Rendering シーン.blend", "Кадр 1 of 2 🎬")
                .with_start(1)
                .with_large_image("blender", "4.2 Beta ✓"),
        ];

        for snapshot in snapshots {
            let command = Command::set_activity(4242, Some(Activity::from(&snapshot)));
            let bytes = encode(Opcode::Frame, &command).unwrap();
            let frame = decode(&bytes).unwrap();
            assert_eq!(frame.opcode, Opcode::Frame);

            let back: Command = frame.json().unwrap();
            assert_eq!(back.args.pid, 4242);
            let activity = back.args.activity.unwrap_or_default();
            assert_eq!(StatusSnapshot::from(activity), snapshot);
        }
    }

    #[test]
    fn test_render_context_animation_flag() {
        let mut ctx = RenderContext::new(0);
        assert!(!ctx.is_animation());
        ctx.frame_rendered();
        assert!(ctx.is_animation());
        assert_eq!(ctx.rendered_frames, 1);
    }
}
