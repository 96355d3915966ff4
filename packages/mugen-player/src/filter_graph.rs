//! Filter-graph composition for per-song video overlays and audio leveling.
//!
//! [`generate_composition`] is pure: the same song, options and capabilities
//! always produce the same expression. Runtime capability detection lives in
//! [`MediaCapabilities::negotiate`] so the avatar and QR clauses never disagree
//! about which scaling path to use.

/// Expression used when complex filters are unavailable.
pub const PASSTHROUGH: &str = "[vid1]null[vo]";

/// First FFmpeg release whose `scale` filter accepts a reference input.
const SCALE_REFERENCE_MAJOR: u64 = 7;
const SCALE_REFERENCE_DATE: (u32, u32, u32) = (2024, 4, 5);

/// FFmpeg release line whose complex filters break overlay composition.
const UNSUPPORTED_FFMPEG_PREFIX: &str = "4.";

/// Seconds the avatar stays visible at each end of the song.
const AVATAR_WINDOW_SECS: f64 = 8.0;
const AVATAR_HEIGHT_RATIO: f64 = 0.2;
const QR_HEIGHT_RATIO: f64 = 0.15;
const EDGE_MARGIN: f64 = 0.02;

/// Host desktop platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
    MacOs,
    Other,
}

impl Platform {
    #[must_use]
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Other
        }
    }
}

/// What the player's embedded media library can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaCapabilities {
    /// Complex filter graphs work at all on this host.
    pub complex_filters: bool,
    /// `scale` supports `rw`/`rh` against a reference stream; otherwise the
    /// deprecated `scale2ref` is used.
    pub scale_with_reference: bool,
}

impl MediaCapabilities {
    /// Derives capabilities from the platform and the reported FFmpeg version.
    ///
    /// Accepts release strings (`7.0.1`, `n6.1`), git builds (`N-113245-g..`)
    /// and date-coded builds (`2024-05-01-git-..`).
    #[must_use]
    pub fn negotiate(platform: Platform, ffmpeg_version: &str) -> Self {
        let version = ffmpeg_version.trim();
        let complex_filters =
            platform != Platform::MacOs && !version.starts_with(UNSUPPORTED_FFMPEG_PREFIX);

        Self {
            complex_filters,
            scale_with_reference: supports_scale_reference(version),
        }
    }

    /// Capabilities when nothing is known about the runtime yet.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            complex_filters: true,
            scale_with_reference: false,
        }
    }
}

impl Default for MediaCapabilities {
    fn default() -> Self {
        Self::conservative()
    }
}

fn supports_scale_reference(version: &str) -> bool {
    if version.starts_with("N-") {
        return true;
    }
    if let Some(date) = parse_build_date(version) {
        return date >= SCALE_REFERENCE_DATE;
    }
    let release = version.strip_prefix('n').unwrap_or(version);
    release
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|major| major.parse::<u64>().ok())
        .is_some_and(|major| major >= SCALE_REFERENCE_MAJOR)
}

fn parse_build_date(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.splitn(4, '-');
    let year = parts.next()?;
    let month = parts.next()?;
    let day = parts.next()?;
    if year.len() != 4 || month.len() != 2 || day.len() != 2 {
        return None;
    }
    Some((year.parse().ok()?, month.parse().ok()?, day.parse().ok()?))
}

/// Loudness measurements of one media file.
#[derive(Debug, Clone, PartialEq)]
pub struct Loudnorm {
    measured_i: String,
    measured_tp: String,
    measured_lra: String,
    measured_thresh: String,
    offset: String,
}

impl Loudnorm {
    /// Parses `I,TP,LRA,thresh,offset`. Returns `None` unless all five fields
    /// are numeric.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
        if fields.len() != 5 || fields.iter().any(|f| f.parse::<f64>().is_err()) {
            return None;
        }
        Some(Self {
            measured_i: fields[0].to_string(),
            measured_tp: fields[1].to_string(),
            measured_lra: fields[2].to_string(),
            measured_thresh: fields[3].to_string(),
            offset: fields[4].to_string(),
        })
    }

    fn clause(&self) -> String {
        format!(
            "[aid1]loudnorm=measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:offset={}:linear=true:lra=15:i=-15[ao]",
            self.measured_i, self.measured_tp, self.measured_lra, self.measured_thresh, self.offset
        )
    }
}

/// Per-song inputs.
#[derive(Debug, Clone, Default)]
pub struct CompositionSong {
    /// Song duration in seconds.
    pub duration: f64,
    /// Raw loudness string, `I,TP,LRA,thresh,offset`.
    pub loudnorm: Option<String>,
    /// Requester avatar image.
    pub avatar: Option<String>,
}

/// Display toggles and overlay assets.
#[derive(Debug, Clone)]
pub struct CompositionOptions {
    /// The media carries a video stream to draw overlays on.
    pub show_video: bool,
    pub show_avatar: bool,
    pub show_qr_code: bool,
    pub qr_code_image: Option<String>,
    /// Fraction of the avatar width kept inside the circular crop.
    pub avatar_crop_ratio: f64,
}

impl Default for CompositionOptions {
    fn default() -> Self {
        Self {
            show_video: true,
            show_avatar: false,
            show_qr_code: false,
            qr_code_image: None,
            avatar_crop_ratio: 1.0,
        }
    }
}

/// Generated expression plus the extra inputs it references.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Composition {
    /// Value for the player's `lavfi-complex` option. Empty means none.
    pub lavfi_complex: String,
    /// Files for `external-files`, in `[vid2]`, `[vid3]` order.
    pub external_files: Vec<String>,
}

impl Composition {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lavfi_complex.is_empty()
    }
}

/// Builds the filter graph for one song.
#[must_use]
pub fn generate_composition(
    song: &CompositionSong,
    options: &CompositionOptions,
    capabilities: &MediaCapabilities,
) -> Composition {
    if !capabilities.complex_filters {
        return Composition {
            lavfi_complex: PASSTHROUGH.to_string(),
            external_files: Vec::new(),
        };
    }

    let mut clauses = Vec::new();
    let mut external_files = Vec::new();

    if let Some(loudnorm) = song.loudnorm.as_deref().and_then(Loudnorm::parse) {
        clauses.push(loudnorm.clause());
    }

    let avatar = song
        .avatar
        .as_deref()
        .filter(|_| options.show_video && options.show_avatar);
    let qr_code = options
        .qr_code_image
        .as_deref()
        .filter(|_| options.show_video && options.show_qr_code);

    if avatar.is_none() && qr_code.is_none() {
        return Composition {
            lavfi_complex: clauses.join(";"),
            external_files,
        };
    }

    let mut references = vec!["[base]"];
    if avatar.is_some() {
        references.push("[ref_avatar]");
    }
    if qr_code.is_some() {
        references.push("[ref_qr]");
    }
    clauses.push(format!(
        "[vid1]split={}{}",
        references.len(),
        references.concat()
    ));

    let mut video_label = "[base]";

    if let Some(path) = avatar {
        external_files.push(path.to_string());
        let input = format!("[vid{}]", external_files.len() + 1);
        clauses.push(format!(
            "{input}format=yuva420p,geq=lum='p(X,Y)':cb='p(X,Y)':cr='p(X,Y)':a='if(lte(hypot(X-W/2,Y-H/2),W*{ratio}/2),255,0)'[avatar_round]",
            ratio = options.avatar_crop_ratio
        ));
        clauses.push(scale_clause(
            "[avatar_round]",
            "[ref_avatar]",
            "avatar",
            AVATAR_HEIGHT_RATIO,
            capabilities,
        ));

        let output = if qr_code.is_some() { "[with_avatar]" } else { "[vo]" };
        let tail_start = (song.duration - AVATAR_WINDOW_SECS).max(0.0);
        clauses.push(format!(
            "{video_label}[avatar]overlay=x=W-w-W*{m}:y=H-h-H*{m}:enable='between(t,0,{w})+between(t,{tail_start},{end})'{output}",
            m = EDGE_MARGIN,
            w = AVATAR_WINDOW_SECS,
            end = song.duration,
        ));
        video_label = output;
    }

    if let Some(path) = qr_code {
        external_files.push(path.to_string());
        let input = format!("[vid{}]", external_files.len() + 1);
        clauses.push(scale_clause(&input, "[ref_qr]", "qr", QR_HEIGHT_RATIO, capabilities));

        clauses.push(format!(
            "{video_label}[qr]overlay=x=W-w-W*{m}:y=H*{m}[vo]",
            m = EDGE_MARGIN
        ));
    }

    Composition {
        lavfi_complex: clauses.join(";"),
        external_files,
    }
}

/// Scales `input` to a fraction of the reference video's height.
fn scale_clause(
    input: &str,
    reference: &str,
    name: &str,
    height_ratio: f64,
    capabilities: &MediaCapabilities,
) -> String {
    if capabilities.scale_with_reference {
        format!("{input}{reference}scale=w=-1:h=rh*{height_ratio}[{name}]")
    } else {
        format!(
            "{input}{reference}scale2ref=w=oh*mdar:h=ih*{height_ratio}[{name}][{name}_ref_out];[{name}_ref_out]nullsink"
        )
    }
}
