use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DEFAULT_OCCUPANCY_THRESHOLD;
use crate::lane::LaneLayout;
use crate::{LaneId, SlotRect};

const DEFAULT_INCIDENT_DIR: &str = "incident_captures";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_SERIAL_SETTLE_MS: u64 = 2_000;
const DEFAULT_CYCLE_INTERVAL_MS: u64 = 1_000;
const DEFAULT_COOLDOWN_MS: u64 = 5_000;
const DEFAULT_BUCKET: &str = "parking_lot_images";
const DEFAULT_LOCATION_ID: i64 = 8;
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_CAMERAS: [&str; 2] = ["camA", "camB"];

/// Ten bays in two rows of five, identical for both default cameras.
const DEFAULT_SLOTS: [SlotRect; 10] = [
    SlotRect::new(100, 80, 30, 60),
    SlotRect::new(160, 80, 30, 60),
    SlotRect::new(230, 80, 30, 60),
    SlotRect::new(310, 80, 30, 60),
    SlotRect::new(380, 80, 30, 60),
    SlotRect::new(100, 150, 30, 60),
    SlotRect::new(160, 150, 30, 60),
    SlotRect::new(230, 150, 30, 60),
    SlotRect::new(310, 150, 30, 60),
    SlotRect::new(380, 150, 30, 60),
];

#[derive(Debug, Deserialize, Default)]
struct ParkingdConfigFile {
    occupancy_threshold: Option<usize>,
    incident_dir: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    serial: Option<SerialConfigFile>,
    sink: Option<SinkConfigFile>,
    timing: Option<TimingConfigFile>,
    lanes: Option<Vec<LaneConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SerialConfigFile {
    port: Option<String>,
    baud_rate: Option<u32>,
    timeout_ms: Option<u64>,
    settle_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    kind: Option<String>,
    url: Option<String>,
    key: Option<String>,
    bucket: Option<String>,
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    cycle_interval_ms: Option<u64>,
    cooldown_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LaneConfigFile {
    camera_id: String,
    source: Option<String>,
    location_id: Option<i64>,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
    slots: Option<Vec<SlotRect>>,
}

#[derive(Debug, Clone)]
pub struct ParkingdConfig {
    pub occupancy_threshold: usize,
    pub incident_dir: PathBuf,
    pub api_addr: String,
    pub serial: SerialSettings,
    pub sink: SinkSettings,
    pub cycle_interval: Duration,
    pub cooldown: Duration,
    pub lanes: Vec<LaneConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Explicit port; `None` means scan for the controller.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout: Duration,
    pub settle: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSettings {
    Disabled,
    Supabase {
        url: String,
        key: String,
        bucket: String,
    },
    Sqlite {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneConfig {
    pub camera_id: String,
    /// Frame source URL, see `ingest::open_source`.
    pub source: String,
    pub location_id: i64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub slots: Vec<SlotRect>,
}

impl ParkingdConfig {
    /// File named by `PARKING_CONFIG` (if set), then defaults, then env.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PARKING_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ParkingdConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ParkingdConfigFile) -> Result<Self> {
        let serial_file = file.serial.unwrap_or_default();
        let serial = SerialSettings {
            port: serial_file.port.filter(|p| !p.trim().is_empty()),
            baud_rate: serial_file.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
            timeout: Duration::from_millis(
                serial_file.timeout_ms.unwrap_or(DEFAULT_SERIAL_TIMEOUT_MS),
            ),
            settle: Duration::from_millis(
                serial_file.settle_ms.unwrap_or(DEFAULT_SERIAL_SETTLE_MS),
            ),
        };
        let sink = match file.sink {
            Some(sink) => sink_from_file(sink)?,
            None => SinkSettings::Disabled,
        };
        let timing = file.timing.unwrap_or_default();
        let lanes = match file.lanes {
            Some(lanes) => lanes.into_iter().map(lane_from_file).collect(),
            None => default_lanes(),
        };
        Ok(Self {
            occupancy_threshold: file
                .occupancy_threshold
                .unwrap_or(DEFAULT_OCCUPANCY_THRESHOLD),
            incident_dir: file
                .incident_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INCIDENT_DIR)),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            serial,
            sink,
            cycle_interval: Duration::from_millis(
                timing.cycle_interval_ms.unwrap_or(DEFAULT_CYCLE_INTERVAL_MS),
            ),
            cooldown: Duration::from_millis(timing.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS)),
            lanes,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(threshold) = env_parse::<usize>("OCCUPANCY_THRESHOLD")? {
            self.occupancy_threshold = threshold;
        }
        if let Some(baud) = env_parse::<u32>("ESP32_BAUD_RATE")? {
            self.serial.baud_rate = baud;
        }
        if let Some(dir) = env_nonempty("INCIDENT_CAPTURE_DIR") {
            self.incident_dir = PathBuf::from(dir);
        }
        if let Some(addr) = env_nonempty("PARKING_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(port) = env_nonempty("PARKING_SERIAL_PORT") {
            self.serial.port = Some(port);
        }
        if let Some(location_id) = env_parse::<i64>("PARKING_LOCATION_ID")? {
            for lane in &mut self.lanes {
                lane.location_id = location_id;
            }
        }

        let env_url = env_nonempty("SUPABASE_URL");
        let env_key = env_nonempty("SUPABASE_KEY");
        if env_url.is_some() || env_key.is_some() {
            let (file_url, file_key, bucket) = match &self.sink {
                SinkSettings::Supabase { url, key, bucket } => {
                    (Some(url.clone()), Some(key.clone()), bucket.clone())
                }
                _ => (None, None, DEFAULT_BUCKET.to_string()),
            };
            let url = env_url.or(file_url).ok_or_else(|| {
                anyhow!("SUPABASE_KEY is set but no Supabase URL is configured")
            })?;
            let key = env_key.or(file_key).ok_or_else(|| {
                anyhow!("SUPABASE_URL is set but no Supabase key is configured")
            })?;
            self.sink = SinkSettings::Supabase { url, key, bucket };
        }
        if let Some(path) = env_nonempty("PARKING_SQLITE_PATH") {
            self.sink = SinkSettings::Sqlite {
                path: PathBuf::from(path),
            };
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.occupancy_threshold == 0 {
            return Err(anyhow!("occupancy threshold must be greater than zero"));
        }
        if self.serial.baud_rate == 0 {
            return Err(anyhow!("serial baud rate must be greater than zero"));
        }
        if self.cycle_interval.is_zero() || self.cooldown.is_zero() {
            return Err(anyhow!("cycle interval and cooldown must be greater than zero"));
        }
        self.api_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid API address {}", self.api_addr))?;
        if self.lanes.is_empty() {
            return Err(anyhow!("at least one lane must be configured"));
        }
        if self.lanes.len() > LaneId::MAX as usize {
            return Err(anyhow!("at most {} lanes are supported", LaneId::MAX));
        }
        for (i, lane) in self.lanes.iter().enumerate() {
            validate_lane(lane)?;
            if self.lanes[..i].iter().any(|l| l.camera_id == lane.camera_id) {
                return Err(anyhow!("duplicate camera id {}", lane.camera_id));
            }
        }
        Ok(())
    }

    pub fn total_slots(&self) -> usize {
        self.lanes.iter().map(|l| l.slots.len()).sum()
    }

    /// Lane layouts with 1-based lane ids and running slot-id offsets.
    pub fn lane_layouts(&self) -> Vec<LaneLayout> {
        let mut offset = 0u32;
        self.lanes
            .iter()
            .enumerate()
            .map(|(i, lane)| {
                let layout = LaneLayout {
                    lane: (i + 1) as LaneId,
                    camera_id: lane.camera_id.clone(),
                    location_id: lane.location_id,
                    slots: lane.slots.clone(),
                    slot_offset: offset,
                };
                offset += lane.slots.len() as u32;
                layout
            })
            .collect()
    }
}

fn validate_lane(lane: &LaneConfig) -> Result<()> {
    let cam = &lane.camera_id;
    if cam.trim().is_empty() {
        return Err(anyhow!("lane camera id must not be empty"));
    }
    if lane.source.trim().is_empty() {
        return Err(anyhow!("lane {} has no frame source", cam));
    }
    if lane.frame_width == 0 || lane.frame_height == 0 {
        return Err(anyhow!("lane {} frame size must be non-zero", cam));
    }
    if lane.slots.is_empty() {
        return Err(anyhow!("lane {} has no slots", cam));
    }
    for (i, rect) in lane.slots.iter().enumerate() {
        if rect.is_empty() {
            return Err(anyhow!("lane {} slot {} has zero area", cam, i + 1));
        }
        if !rect.fits_within(lane.frame_width, lane.frame_height) {
            return Err(anyhow!(
                "lane {} slot {} {:?} lies outside the {}x{} frame",
                cam,
                i + 1,
                <[u32; 4]>::from(*rect),
                lane.frame_width,
                lane.frame_height
            ));
        }
        if let Some(j) = lane.slots[..i].iter().position(|other| other.overlaps(rect)) {
            return Err(anyhow!(
                "lane {} slot {} overlaps slot {}",
                cam,
                i + 1,
                j + 1
            ));
        }
    }
    Ok(())
}

fn default_lanes() -> Vec<LaneConfig> {
    DEFAULT_CAMERAS
        .iter()
        .map(|camera_id| LaneConfig {
            camera_id: camera_id.to_string(),
            source: format!("stub://{}", camera_id),
            location_id: DEFAULT_LOCATION_ID,
            frame_width: DEFAULT_FRAME_WIDTH,
            frame_height: DEFAULT_FRAME_HEIGHT,
            slots: DEFAULT_SLOTS.to_vec(),
        })
        .collect()
}

fn lane_from_file(lane: LaneConfigFile) -> LaneConfig {
    LaneConfig {
        source: lane
            .source
            .unwrap_or_else(|| format!("stub://{}", lane.camera_id)),
        location_id: lane.location_id.unwrap_or(DEFAULT_LOCATION_ID),
        frame_width: lane.frame_width.unwrap_or(DEFAULT_FRAME_WIDTH),
        frame_height: lane.frame_height.unwrap_or(DEFAULT_FRAME_HEIGHT),
        slots: lane.slots.unwrap_or_else(|| DEFAULT_SLOTS.to_vec()),
        camera_id: lane.camera_id,
    }
}

fn sink_from_file(sink: SinkConfigFile) -> Result<SinkSettings> {
    let kind = match sink.kind.as_deref().map(str::to_ascii_lowercase) {
        Some(kind) => kind,
        None if sink.url.is_some() || sink.key.is_some() => "supabase".to_string(),
        None if sink.path.is_some() => "sqlite".to_string(),
        None => "disabled".to_string(),
    };
    match kind.as_str() {
        "disabled" | "none" => Ok(SinkSettings::Disabled),
        "supabase" => Ok(SinkSettings::Supabase {
            url: sink
                .url
                .ok_or_else(|| anyhow!("supabase sink requires a url"))?,
            key: sink
                .key
                .ok_or_else(|| anyhow!("supabase sink requires a key"))?,
            bucket: sink.bucket.unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
        }),
        "sqlite" => Ok(SinkSettings::Sqlite {
            path: sink
                .path
                .ok_or_else(|| anyhow!("sqlite sink requires a path"))?,
        }),
        other => Err(anyhow!(
            "unknown sink kind '{}'; expected supabase, sqlite or disabled",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<ParkingdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_nonempty(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a number, got {:?}", key, raw)),
        None => Ok(None),
    }
}
