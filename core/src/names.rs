// Human-readable names for log lines
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const ADJECTIVES: &[&str] = &[
    "amber", "brave", "calm", "dizzy", "eager", "fuzzy", "gentle", "hasty", "icy", "jolly",
    "keen", "lively", "mellow", "nimble", "odd", "plucky", "quiet", "rusty", "sleepy", "tidy",
    "upbeat", "vivid", "witty", "young", "zesty",
];

const NOUNS: &[&str] = &[
    "badger", "canyon", "dolphin", "ember", "falcon", "glacier", "harbor", "island", "jackal",
    "kettle", "lantern", "meadow", "nebula", "otter", "pebble", "quarry", "raven", "spruce",
    "tundra", "umbrella", "violet", "walrus", "yonder", "zephyr",
];

const COLORS: &[&str] = &[
    "red", "orange", "yellow", "green", "blue", "indigo", "violet", "crimson", "teal", "cyan",
    "magenta", "gold", "silver", "scarlet", "azure", "coral", "ivory", "jade", "lilac", "olive",
];

const SPACE: &[&str] = &[
    "comet", "nova", "pulsar", "quasar", "nebula", "orbit", "meteor", "galaxy", "eclipse",
    "aurora", "cosmos", "zenith", "horizon", "photon", "rocket", "saturn", "jupiter", "mars",
    "venus", "titan",
];

fn pick(seed: u64, first: &[&str], second: &[&str]) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let a = first.choose(&mut rng).copied().unwrap_or("unnamed");
    let b = second.choose(&mut rng).copied().unwrap_or("thing");
    format!("{a}-{b}")
}

/// Display name for a connection, stable for a given id
pub fn connection_name(id: u64) -> String {
    pick(id, ADJECTIVES, NOUNS)
}

/// Display name for a delivery batch, stable for a given correlation id
pub fn batch_name(correlation_id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    correlation_id.hash(&mut hasher);
    pick(hasher.finish(), COLORS, SPACE)
}
