//! Scene aggregate: the reader, the tag population, one channel per
//! reader-tag link and the run's random number source.

use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::sim::channel::Channel;
use crate::sim::config::SimulationConfig;
use crate::sim::reader::Reader;
use crate::sim::tag::Tag;

/// All mutable state of one simulation pass. Built before the event loop
/// starts and mutated only from within event handlers.
pub struct Scene {
    pub reader: Reader,
    pub tags: Vec<Tag>,
    /// Channel state per tag, indexed like `tags`.
    pub channels: Vec<Channel>,
    pub max_distance: f64,
    pub position_update_interval: f64,
    /// Rounds before the pass ends; negative means unbounded.
    pub max_num_rounds: i32,
    pub verbose: bool,
    pub rng: SmallRng,
}

impl Scene {
    pub fn new(config: &SimulationConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        let reader = Reader::new(&config.reader);
        let tags: Vec<Tag> = config
            .tags
            .iter()
            .map(|tag_config| Tag::new(tag_config, &config.reader, &mut rng))
            .collect();
        let channels: Vec<Channel> = config
            .tags
            .iter()
            .map(|_| {
                Channel::new(
                    config.channel.model.build(),
                    config.channel.thermal_noise,
                    config.channel.speed_of_light,
                )
            })
            .collect();

        Scene {
            reader,
            tags,
            channels,
            max_distance: config.scene.max_distance,
            position_update_interval: config.scene.position_update_interval,
            max_num_rounds: config.scene.max_num_rounds,
            verbose: config.scene.verbose,
            rng,
        }
    }

    /// Indices of tags currently holding power.
    pub fn powered_tags(&self) -> Vec<usize> {
        self.tags
            .iter()
            .enumerate()
            .filter(|(_, tag)| tag.powered())
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::config::tests_support::base_config;
    use crate::sim::tag::TagState;

    #[test]
    fn builds_one_channel_per_tag() {
        let mut config = base_config();
        config.tags.push(config.tags[0].clone());
        config.tags.push(config.tags[0].clone());
        let scene = Scene::new(&config);
        assert_eq!(scene.tags.len(), 3);
        assert_eq!(scene.channels.len(), 3);
        assert!(scene.powered_tags().is_empty());
    }

    #[test]
    fn powered_tags_tracks_state() {
        let mut config = base_config();
        config.tags.push(config.tags[0].clone());
        let mut scene = Scene::new(&config);
        scene.tags[1].state = TagState::Ready;
        assert_eq!(scene.powered_tags(), vec![1]);
    }

    #[test]
    fn seeded_scenes_are_identical() {
        let config = base_config();
        let a = Scene::new(&config);
        let b = Scene::new(&config);
        assert_eq!(a.tags[0].epc, b.tags[0].epc);
    }
}
