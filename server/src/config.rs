//! Server configuration
//!
//! Configuration is loaded from environment variables. Unset or malformed
//! variables keep their defaults.

use std::env;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Tile rendering configuration
    pub tiles: TileConfig,

    /// Dot de-duplication configuration
    pub dedup: DedupConfig,

    /// Query state configuration
    pub query: QueryConfig,

    /// Camera bounds configuration
    pub bounds: BoundsConfig,

    /// Demo data configuration
    pub demo: DemoConfig,
}

/// Tile rendering and caching configuration
#[derive(Debug, Clone)]
pub struct TileConfig {
    /// Maximum summed size of cached tiles in bytes
    pub cache_max_bytes: usize,
    /// Tile edge length in density-independent pixels
    pub tile_size_dp: u32,
    /// Device pixels per density-independent pixel
    pub density: f32,
    /// Cases requested per page while rendering a tile
    pub page_size: usize,
    /// Highest zoom level that is rendered as dot tiles
    pub max_render_zoom: u32,
    /// Dot diameter in density-independent pixels
    pub dot_size_dp: u32,
    /// Minimum time between live case count checks triggered by requests
    /// for tiles that look fresh
    pub count_refresh_interval: Duration,
}

/// Dot de-duplication thresholds
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Incidents with fewer cases are never de-duplicated
    pub min_case_count: u64,
    /// De-duplication only applies at or below this zoom
    pub max_zoom: u32,
    /// Buckets per tile axis
    pub resolution: u32,
}

/// Query state coalescing configuration
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Settle time for zoom and bounds changes
    pub debounce: Duration,
}

/// Camera bounds configuration
#[derive(Debug, Clone)]
pub struct BoundsConfig {
    /// Degrees added around a degenerate (zero width or height) box
    pub degenerate_epsilon: f64,
}

/// Demo data configuration
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Cases generated for the demo incident
    pub case_count: usize,
    /// Seed for the demo data generator
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tiles: TileConfig::default(),
            dedup: DedupConfig::default(),
            query: QueryConfig::default(),
            bounds: BoundsConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            cache_max_bytes: 64 * 1024 * 1024, // 64 MB
            tile_size_dp: 256,
            density: 1.0,
            page_size: 2000,
            max_render_zoom: 13,
            dot_size_dp: 12,
            count_refresh_interval: Duration::from_secs(2),
        }
    }
}

impl TileConfig {
    /// Tile edge length in device pixels
    pub fn tile_size_px(&self) -> u32 {
        ((self.tile_size_dp as f32 * self.density).round() as u32).max(1)
    }

    /// Dot diameter in device pixels
    pub fn dot_size_px(&self) -> u32 {
        ((self.dot_size_dp as f32 * self.density).round() as u32).max(1)
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            min_case_count: 300,
            max_zoom: 7,
            resolution: 256,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
        }
    }
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            degenerate_epsilon: 0.02,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            case_count: 5000,
            seed: 42,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Server config
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        // Tile config
        if let Ok(val) = env::var("TILE_CACHE_MAX_MB")
            && let Ok(mb) = val.parse::<usize>()
        {
            config.tiles.cache_max_bytes = mb * 1024 * 1024;
        }
        if let Ok(val) = env::var("TILE_SIZE_DP")
            && let Ok(size) = val.parse()
        {
            config.tiles.tile_size_dp = size;
        }
        if let Ok(val) = env::var("SCREEN_DENSITY")
            && let Ok(density) = val.parse::<f32>()
            && density > 0.0
        {
            config.tiles.density = density;
        }
        if let Ok(val) = env::var("TILE_PAGE_SIZE")
            && let Ok(size) = val.parse::<usize>()
            && size > 0
        {
            config.tiles.page_size = size;
        }
        if let Ok(val) = env::var("TILE_MAX_RENDER_ZOOM")
            && let Ok(zoom) = val.parse()
        {
            config.tiles.max_render_zoom = zoom;
        }
        if let Ok(val) = env::var("DOT_SIZE_DP")
            && let Ok(size) = val.parse()
        {
            config.tiles.dot_size_dp = size;
        }
        if let Ok(val) = env::var("TILE_COUNT_REFRESH_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.tiles.count_refresh_interval = Duration::from_millis(ms);
        }

        // Dedup config
        if let Ok(val) = env::var("DEDUP_MIN_CASES")
            && let Ok(count) = val.parse()
        {
            config.dedup.min_case_count = count;
        }
        if let Ok(val) = env::var("DEDUP_MAX_ZOOM")
            && let Ok(zoom) = val.parse()
        {
            config.dedup.max_zoom = zoom;
        }
        if let Ok(val) = env::var("DEDUP_RESOLUTION")
            && let Ok(resolution) = val.parse::<u32>()
            && resolution > 0
        {
            config.dedup.resolution = resolution;
        }

        // Query config
        if let Ok(val) = env::var("QUERY_DEBOUNCE_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.query.debounce = Duration::from_millis(ms);
        }

        // Bounds config
        if let Ok(val) = env::var("BOUNDS_EPSILON_DEG")
            && let Ok(eps) = val.parse::<f64>()
            && eps > 0.0
        {
            config.bounds.degenerate_epsilon = eps;
        }

        // Demo config
        if let Ok(val) = env::var("DEMO_CASES")
            && let Ok(count) = val.parse()
        {
            config.demo.case_count = count;
        }
        if let Ok(val) = env::var("DEMO_SEED")
            && let Ok(seed) = val.parse()
        {
            config.demo.seed = seed;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.tiles.page_size, 2000);
        assert_eq!(config.dedup.min_case_count, 300);
        assert_eq!(config.dedup.max_zoom, 7);
        assert_eq!(config.query.debounce, Duration::from_millis(50));
        assert_eq!(config.tiles.count_refresh_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_pixel_sizes_scale_with_density() {
        let mut tiles = TileConfig::default();
        assert_eq!(tiles.tile_size_px(), 256);
        assert_eq!(tiles.dot_size_px(), 12);

        tiles.density = 2.0;
        assert_eq!(tiles.tile_size_px(), 512);
        assert_eq!(tiles.dot_size_px(), 24);
    }

    #[test]
    fn test_config_from_env() {
        // This test doesn't set env vars, so it should return defaults
        let config = Config::from_env();
        assert_eq!(config.host, "0.0.0.0");
    }
}
