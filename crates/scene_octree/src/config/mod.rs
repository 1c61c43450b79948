//! Configuration system

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Static instancing consolidation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticInstancingConfig {
    /// Whether consolidation runs at all
    pub enabled: bool,
    /// Minimum members before a group is consolidated
    pub min_instances: usize,
    /// Upper bound on consolidated groups per node
    pub max_groups: usize,
}

impl Default for StaticInstancingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_instances: 8,
            max_groups: 128,
        }
    }
}

/// Tunables of the octree spatial index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OctreeConfig {
    /// Nodes this size or smaller never split further (world units)
    pub min_node_size: f32,
    /// An object descends while its radius is below this fraction of
    /// the node radius
    pub object_to_node_size_ratio: f32,
    /// Objects descend only while their view distance stays below the
    /// node radius times this ratio
    pub view_dist_ratio: f32,
    /// Scales an object's view distance into its shadow cast distance
    pub cast_dist_ratio: f32,
    /// Objects visible closer than this never enter caster lists
    pub min_caster_view_dist: f32,
    /// Extra reach added to view distances during streaming prediction
    pub prediction_margin: f32,
    /// Hard cap on compiled caster records per node
    pub max_casters_per_node: usize,
    /// Whether particle emitters may cast shadows at all
    pub particle_shadows: bool,
    /// Hand visible nodes to the job queue instead of expanding inline
    pub jobs_enabled: bool,
    /// Bit mask over object type tags accepted by visibility walks
    pub enabled_types: u32,
    /// Static instancing consolidation
    pub static_instancing: StaticInstancingConfig,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            min_node_size: 8.0,
            object_to_node_size_ratio: 0.125,
            view_dist_ratio: 100.0,
            cast_dist_ratio: 1.0,
            min_caster_view_dist: 8.0,
            prediction_margin: 16.0,
            max_casters_per_node: 4096,
            particle_shadows: true,
            jobs_enabled: false,
            enabled_types: !0,
            static_instancing: StaticInstancingConfig::default(),
        }
    }
}

impl Config for OctreeConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_round_trip() {
        let config = OctreeConfig {
            min_node_size: 4.0,
            ..OctreeConfig::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: OctreeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.min_node_size, 4.0);
        assert_eq!(parsed.max_casters_per_node, config.max_casters_per_node);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: OctreeConfig = toml::from_str("min_node_size = 2.0").unwrap();
        assert_eq!(parsed.min_node_size, 2.0);
        assert_eq!(parsed.view_dist_ratio, 100.0);
        assert!(!parsed.static_instancing.enabled);
    }

    #[test]
    fn test_ron_round_trip() {
        let config = OctreeConfig::default();
        let text = ron::ser::to_string_pretty(&config, Default::default()).unwrap();
        let parsed: OctreeConfig = ron::from_str(&text).unwrap();
        assert_eq!(parsed.prediction_margin, config.prediction_margin);
    }
}
