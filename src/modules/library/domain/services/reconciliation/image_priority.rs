/// Display image selection
///
/// Each asset type (cover, poster, banner) ranks agents by priority, lower
/// preferred. The selector walks an agent's candidates in that order. Agents
/// whose image failed to download are recorded on the unified record and
/// skipped from then on, so the next candidate takes over.
use crate::modules::agents::domain::ImageKind;
use crate::modules::library::domain::unified::UnifiedManga;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct ImageCandidate {
    pub kind: ImageKind,
    pub agent_id: String,
    pub url: String,
    pub priority: u32,
}

/// Priority used for agents that never declared one
pub const UNRANKED_PRIORITY: u32 = u32::MAX;

/// Asset type -> agent id -> priority
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImagePriorities(HashMap<ImageKind, HashMap<String, u32>>);

impl ImagePriorities {
    /// The same agent order for every asset type
    pub fn uniform(priorities: HashMap<String, u32>) -> Self {
        Self(
            ImageKind::ALL
                .iter()
                .map(|kind| (*kind, priorities.clone()))
                .collect(),
        )
    }

    pub fn set(&mut self, kind: ImageKind, agent_id: impl Into<String>, priority: u32) {
        self.0.entry(kind).or_default().insert(agent_id.into(), priority);
    }

    pub fn with(mut self, kind: ImageKind, agent_id: impl Into<String>, priority: u32) -> Self {
        self.set(kind, agent_id, priority);
        self
    }

    pub fn get(&self, kind: ImageKind, agent_id: &str) -> u32 {
        self.0
            .get(&kind)
            .and_then(|agents| agents.get(agent_id))
            .copied()
            .unwrap_or(UNRANKED_PRIORITY)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageSelector {
    priorities: ImagePriorities,
}

impl ImageSelector {
    pub fn new(priorities: ImagePriorities) -> Self {
        Self { priorities }
    }

    /// Candidates in pick order, unavailable agents removed; ties broken by agent id
    pub fn ranked(
        &self,
        kind: ImageKind,
        images: &BTreeMap<String, String>,
        unavailable: &BTreeSet<String>,
    ) -> Vec<ImageCandidate> {
        let mut candidates: Vec<ImageCandidate> = images
            .iter()
            .filter(|(agent_id, url)| !url.trim().is_empty() && !unavailable.contains(*agent_id))
            .map(|(agent_id, url)| ImageCandidate {
                kind,
                agent_id: agent_id.clone(),
                url: url.clone(),
                priority: self.priorities.get(kind, agent_id),
            })
            .collect();
        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.agent_id.cmp(&b.agent_id)));
        candidates
    }

    pub fn pick(
        &self,
        kind: ImageKind,
        images: &BTreeMap<String, String>,
        unavailable: &BTreeSet<String>,
    ) -> Option<ImageCandidate> {
        self.ranked(kind, images, unavailable).into_iter().next()
    }

    /// Refresh every display slot of `manga` from its images and exclusions
    pub fn apply(&self, manga: &mut UnifiedManga) {
        let none = BTreeSet::new();
        for kind in ImageKind::ALL {
            let picked = manga.images.get(&kind).and_then(|images| {
                let unavailable = manga.unavailable_images.get(&kind).unwrap_or(&none);
                self.pick(kind, images, unavailable)
            });
            manga.set_display_image(kind, picked.map(|c| c.url));
        }
    }

    /// Mark the agent's image as unavailable and pick the next candidate
    pub fn fallback(
        &self,
        manga: &mut UnifiedManga,
        kind: ImageKind,
        failed_agent: &str,
    ) -> Option<ImageCandidate> {
        manga
            .unavailable_images
            .entry(kind)
            .or_default()
            .insert(failed_agent.to_string());
        self.apply(manga);

        let none = BTreeSet::new();
        manga.images.get(&kind).and_then(|images| {
            self.pick(kind, images, manga.unavailable_images.get(&kind).unwrap_or(&none))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images() -> BTreeMap<String, String> {
        [
            ("anilist".to_string(), "https://img/anilist.jpg".to_string()),
            ("mangadex".to_string(), "https://img/mangadex.jpg".to_string()),
            ("unknown".to_string(), "https://img/unknown.jpg".to_string()),
        ]
        .into()
    }

    fn selector() -> ImageSelector {
        ImageSelector::new(
            ImagePriorities::uniform([("anilist".to_string(), 10), ("mangadex".to_string(), 20)].into())
                .with(ImageKind::Banner, "mangadex", 5),
        )
    }

    #[test]
    fn test_pick_follows_priority_per_asset_type() {
        let none = BTreeSet::new();
        let cover = selector().pick(ImageKind::Cover, &images(), &none).unwrap();
        assert_eq!(cover.agent_id, "anilist");
        let banner = selector().pick(ImageKind::Banner, &images(), &none).unwrap();
        assert_eq!(banner.agent_id, "mangadex");
        assert_eq!(
            selector().ranked(ImageKind::Cover, &images(), &none).last().unwrap().agent_id,
            "unknown"
        );
    }

    #[test]
    fn test_unavailable_agents_are_skipped() {
        let unavailable: BTreeSet<String> = ["anilist".to_string()].into();
        let next = selector().pick(ImageKind::Cover, &images(), &unavailable).unwrap();
        assert_eq!(next.agent_id, "mangadex");

        let all: BTreeSet<String> = images().into_keys().collect();
        assert!(selector().pick(ImageKind::Cover, &images(), &all).is_none());
    }
}
