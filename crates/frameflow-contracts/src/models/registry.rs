use indexmap::IndexMap;

pub const DEFAULT_VIDEO_MODEL: &str = "gen4_turbo";

const GEN4_RATIOS: &[&str] = &[
    "1280:720", "720:1280", "1104:832", "832:1104", "960:960", "1584:672",
];
const GEN3A_RATIOS: &[&str] = &["1280:768", "768:1280"];
const STANDARD_DURATIONS: &[u32] = &[5, 10];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoModelSpec {
    pub name: String,
    pub provider: String,
    pub ratios: Vec<String>,
    pub durations: Vec<u32>,
}

impl VideoModelSpec {
    pub fn supports(&self, ratio: &str, duration: u32) -> bool {
        self.ratios.iter().any(|item| item == ratio) && self.durations.contains(&duration)
    }
}

/// Image-to-video models in preference order.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, VideoModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, VideoModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&VideoModelSpec> {
        self.models.get(name)
    }

    pub fn compatible(&self, provider: &str, ratio: &str, duration: u32) -> Vec<VideoModelSpec> {
        self.models
            .values()
            .filter(|model| model.provider == provider && model.supports(ratio, duration))
            .cloned()
            .collect()
    }
}

fn default_models() -> IndexMap<String, VideoModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, ratios: &[&str], durations: &[u32]| {
        map.insert(
            name.to_string(),
            VideoModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                ratios: ratios.iter().map(|item| (*item).to_string()).collect(),
                durations: durations.to_vec(),
            },
        );
    };

    insert(DEFAULT_VIDEO_MODEL, "runway", GEN4_RATIOS, STANDARD_DURATIONS);
    insert("gen3a_turbo", "runway", GEN3A_RATIOS, STANDARD_DURATIONS);
    insert("dryrun-video-1", "dryrun", GEN4_RATIOS, STANDARD_DURATIONS);

    map
}
