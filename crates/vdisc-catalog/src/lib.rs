//! Section ranking and the recompute pipeline: store -> normalizer -> ranked shelves.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;
use vdisc_adapters::normalize_all;
use vdisc_core::{placeholder_id, Section, SectionBlueprint, VenueCard};
use vdisc_storage::{
    read_all_listings, sha256_hex, InvalidationBus, ListingStore, DEFAULT_LISTING_PREFIX,
};

pub const CRATE_NAME: &str = "vdisc-catalog";

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub store_dir: PathBuf,
    pub listing_prefix: String,
    pub blueprints_path: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub web_port: u16,
}

impl CatalogConfig {
    pub fn from_env() -> Self {
        Self {
            store_dir: std::env::var("VDISC_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./store")),
            listing_prefix: std::env::var("VDISC_LISTING_PREFIX")
                .unwrap_or_else(|_| DEFAULT_LISTING_PREFIX.to_string()),
            blueprints_path: std::env::var("VDISC_BLUEPRINTS").ok().map(PathBuf::from),
            poll_interval_secs: std::env::var("VDISC_POLL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            web_port: std::env::var("VDISC_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }

    pub fn load_blueprints(&self) -> Result<Vec<SectionBlueprint>> {
        match &self.blueprints_path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                parse_blueprints_yaml(&text).with_context(|| format!("parsing {}", path.display()))
            }
            None => Ok(default_blueprints()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct BlueprintsFile {
    blueprints: Vec<SectionBlueprint>,
}

pub fn parse_blueprints_yaml(text: &str) -> Result<Vec<SectionBlueprint>> {
    let file: BlueprintsFile = serde_yaml::from_str(text)?;
    let mut seen = HashSet::new();
    for bp in &file.blueprints {
        if !seen.insert(bp.id.as_str()) {
            bail!("duplicate blueprint id `{}`", bp.id);
        }
    }
    Ok(file.blueprints)
}

/// Built-in storefront shelves.
pub fn default_blueprints() -> Vec<SectionBlueprint> {
    vec![
        SectionBlueprint::new("popular-cebu", "Popular venues in Cebu City", 8),
        SectionBlueprint::new("birthday-cebu", "Popular Birthday venues in Cebu City", 8),
        SectionBlueprint::new("lapu-lapu", "Top picks in Lapu-Lapu City", 8),
        SectionBlueprint::new("weddings", "Dream Wedding venues", 8),
        SectionBlueprint::new("anniversaries", "Celebrate anniversaries", 8),
        SectionBlueprint::new("recently-added", "Recently added", 8),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CityKeyword {
    Cebu,
    LapuLapu,
}

impl CityKeyword {
    const ORDERED: [CityKeyword; 2] = [CityKeyword::Cebu, CityKeyword::LapuLapu];

    fn title_needles(self) -> &'static [&'static str] {
        match self {
            CityKeyword::Cebu => &["cebu"],
            CityKeyword::LapuLapu => &["lapu-lapu", "lapu"],
        }
    }

    fn card_needle(self) -> &'static str {
        match self {
            CityKeyword::Cebu => "cebu",
            CityKeyword::LapuLapu => "lapu",
        }
    }

    /// Compares against the same city-or-region value the card displays.
    pub fn matches(self, card: &VenueCard) -> bool {
        let place = if card.city_key.is_empty() {
            &card.region_key
        } else {
            &card.city_key
        };
        place.contains(self.card_needle())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OccasionKeyword {
    Birthday,
    Anniversary,
    Wedding,
}

impl OccasionKeyword {
    const ORDERED: [OccasionKeyword; 3] = [
        OccasionKeyword::Birthday,
        OccasionKeyword::Anniversary,
        OccasionKeyword::Wedding,
    ];

    fn title_needles(self) -> &'static [&'static str] {
        match self {
            OccasionKeyword::Birthday => &["birthday"],
            OccasionKeyword::Anniversary => &["anniversary", "anniversaries"],
            OccasionKeyword::Wedding => &["wedding"],
        }
    }

    fn card_needle(self) -> &'static str {
        match self {
            OccasionKeyword::Birthday => "birthday",
            OccasionKeyword::Anniversary => "anniversar",
            OccasionKeyword::Wedding => "wedding",
        }
    }

    pub fn matches(self, card: &VenueCard) -> bool {
        card.occasion_keys
            .iter()
            .any(|k| k.contains(self.card_needle()))
    }
}

/// What a blueprint title asks for. City outranks occasion; an occasion named alongside a
/// city only refines the most specific tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    City {
        city: CityKeyword,
        occasion: Option<OccasionKeyword>,
    },
    Occasion(OccasionKeyword),
    Unfiltered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    CityAndOccasion(CityKeyword, OccasionKeyword),
    City(CityKeyword),
    Occasion(OccasionKeyword),
    Any,
}

impl Tier {
    pub fn matches(self, card: &VenueCard) -> bool {
        match self {
            Tier::CityAndOccasion(city, occasion) => city.matches(card) && occasion.matches(card),
            Tier::City(city) => city.matches(card),
            Tier::Occasion(occasion) => occasion.matches(card),
            Tier::Any => true,
        }
    }
}

pub fn classify(title: &str) -> Category {
    let lower = title.to_lowercase();
    let occasion = OccasionKeyword::ORDERED
        .into_iter()
        .find(|o| o.title_needles().iter().any(|n| lower.contains(n)));
    if let Some(city) = CityKeyword::ORDERED
        .into_iter()
        .find(|c| c.title_needles().iter().any(|n| lower.contains(n)))
    {
        return Category::City { city, occasion };
    }
    match occasion {
        Some(occasion) => Category::Occasion(occasion),
        None => Category::Unfiltered,
    }
}

impl Category {
    /// Tiers from most specific to most permissive. Empty for `Unfiltered`.
    pub fn fallback_chain(self) -> Vec<Tier> {
        match self {
            Category::City {
                city,
                occasion: Some(occasion),
            } => vec![Tier::CityAndOccasion(city, occasion), Tier::City(city), Tier::Any],
            Category::City { city, occasion: None } => vec![Tier::City(city), Tier::Any],
            Category::Occasion(occasion) => vec![Tier::Occasion(occasion), Tier::Any],
            Category::Unfiltered => Vec::new(),
        }
    }
}

/// Fill one shelf: walk the fallback chain, fall back to the unfiltered set, truncate, pad.
///
/// The returned section always holds exactly `blueprint.card_count` venues with distinct ids.
pub fn rank_section(blueprint: &SectionBlueprint, cards: &[VenueCard]) -> Section {
    let wanted = blueprint.card_count;
    let mut seen: HashSet<&str> = HashSet::new();
    let mut picked: Vec<&VenueCard> = Vec::new();

    for tier in classify(&blueprint.title).fallback_chain() {
        if picked.len() >= wanted {
            break;
        }
        for card in cards.iter().filter(|c| tier.matches(c)) {
            if seen.insert(card.id.as_str()) {
                picked.push(card);
            }
        }
    }

    if picked.is_empty() {
        for card in cards {
            if seen.insert(card.id.as_str()) {
                picked.push(card);
            }
        }
    }
    picked.truncate(wanted);

    let mut venues: Vec<VenueCard> = picked.into_iter().cloned().collect();
    let taken: HashSet<String> = venues.iter().map(|v| v.id.clone()).collect();
    let mut n = 1;
    while venues.len() < wanted {
        if !taken.contains(&placeholder_id(&blueprint.id, n)) {
            venues.push(VenueCard::placeholder(&blueprint.id, n));
        }
        n += 1;
    }

    Section {
        blueprint: blueprint.clone(),
        venues,
    }
}

pub fn rank_sections(blueprints: &[SectionBlueprint], cards: &[VenueCard]) -> Vec<Section> {
    blueprints.iter().map(|bp| rank_section(bp, cards)).collect()
}

/// Hash of the serialized sections; equal inputs always give equal fingerprints.
pub fn sections_fingerprint(sections: &[Section]) -> Result<String> {
    let bytes = serde_json::to_vec(sections).context("serializing sections")?;
    Ok(sha256_hex(&bytes))
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSnapshot {
    pub run_id: Uuid,
    pub computed_at: DateTime<Utc>,
    pub listing_count: usize,
    pub card_count: usize,
    pub fingerprint: String,
    pub sections: Vec<Section>,
}

impl CatalogSnapshot {
    pub fn section(&self, blueprint_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.blueprint.id == blueprint_id)
    }
}

/// One full read -> normalize -> rank pass over an injected store.
pub struct CatalogPipeline {
    store: Arc<dyn ListingStore>,
    listing_prefix: String,
    blueprints: Vec<SectionBlueprint>,
}

impl CatalogPipeline {
    pub fn new(store: Arc<dyn ListingStore>, blueprints: Vec<SectionBlueprint>) -> Self {
        Self {
            store,
            listing_prefix: DEFAULT_LISTING_PREFIX.to_string(),
            blueprints,
        }
    }

    pub fn with_listing_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.listing_prefix = prefix.into();
        self
    }

    pub fn blueprints(&self) -> &[SectionBlueprint] {
        &self.blueprints
    }

    pub fn store(&self) -> Arc<dyn ListingStore> {
        self.store.clone()
    }

    pub fn listing_prefix(&self) -> &str {
        &self.listing_prefix
    }

    pub fn recompute(&self) -> Result<CatalogSnapshot> {
        let run_id = Uuid::new_v4();
        let span = info_span!("catalog_recompute", %run_id);
        let _guard = span.enter();

        let records = read_all_listings(self.store.as_ref(), &self.listing_prefix)?;
        let cards = normalize_all(&records);
        let sections = rank_sections(&self.blueprints, &cards);
        let fingerprint = sections_fingerprint(&sections)?;

        for section in &sections {
            debug!(
                blueprint = %section.blueprint.id,
                real = section.real_venue_count(),
                placeholders = section.placeholder_count(),
                "section ranked"
            );
        }
        info!(
            listings = records.len(),
            cards = cards.len(),
            sections = sections.len(),
            %fingerprint,
            "catalog recomputed"
        );

        Ok(CatalogSnapshot {
            run_id,
            computed_at: Utc::now(),
            listing_count: records.len(),
            card_count: cards.len(),
            fingerprint,
            sections,
        })
    }
}

/// Holds the latest snapshot and replaces it wholesale on every invalidation.
pub struct CatalogService {
    pipeline: Arc<CatalogPipeline>,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    // Serializes read-and-swap so a slow pass never lands after a newer one.
    refresh_lock: Mutex<()>,
}

impl CatalogService {
    pub fn new(pipeline: CatalogPipeline) -> Result<Self> {
        let initial = pipeline.recompute().context("initial catalog load")?;
        Ok(Self {
            pipeline: Arc::new(pipeline),
            snapshot: RwLock::new(Arc::new(initial)),
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn pipeline(&self) -> &CatalogPipeline {
        &self.pipeline
    }

    pub async fn current(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Full recompute. On failure the previous snapshot stays in place.
    ///
    /// Store reads are blocking, so the pass runs on the blocking pool. Concurrent
    /// callers queue up; each one reads the store only after the previous swap.
    pub async fn refresh(&self) -> Result<Arc<CatalogSnapshot>> {
        let _serial = self.refresh_lock.lock().await;
        let pipeline = self.pipeline.clone();
        let next = tokio::task::spawn_blocking(move || pipeline.recompute())
            .await
            .context("catalog recompute task")??;
        let next = Arc::new(next);
        *self.snapshot.write().await = next.clone();
        Ok(next)
    }

    pub fn spawn_invalidation_listener(self: Arc<Self>, bus: &InvalidationBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => debug!(reason = ?msg.reason, "listings invalidated"),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "invalidations coalesced");
                    }
                    Err(RecvError::Closed) => break,
                }
                if let Err(err) = self.refresh().await {
                    warn!(error = %err, "catalog recompute failed; keeping previous snapshot");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdisc_core::VenueStatus;

    fn card(id: &str, city: &str, occasions: &[&str]) -> VenueCard {
        VenueCard {
            id: id.to_string(),
            name: format!("Venue {id}"),
            price: "₱100".into(),
            location: city.to_string(),
            image: "img".into(),
            amenities: vec![],
            rating: 0.0,
            status: VenueStatus::Listed,
            city_key: city.to_lowercase(),
            region_key: String::new(),
            occasion_keys: occasions.iter().map(|o| o.to_lowercase()).collect(),
            is_placeholder: false,
        }
    }

    fn ids(section: &Section) -> Vec<&str> {
        section.venues.iter().map(|v| v.id.as_str()).collect()
    }

    #[test]
    fn classification_prefers_city_then_occasion() {
        assert_eq!(
            classify("Popular Birthday venues in Cebu City"),
            Category::City {
                city: CityKeyword::Cebu,
                occasion: Some(OccasionKeyword::Birthday)
            }
        );
        assert_eq!(
            classify("Top picks in LAPU-LAPU"),
            Category::City {
                city: CityKeyword::LapuLapu,
                occasion: None
            }
        );
        assert_eq!(
            classify("For your anniversaries"),
            Category::Occasion(OccasionKeyword::Anniversary)
        );
        assert_eq!(classify("Recently added"), Category::Unfiltered);
    }

    #[test]
    fn specific_matches_fill_first_then_next_tiers() {
        // 10 listings, 3 birthday matches, 8 slots.
        let mut cards = Vec::new();
        for i in 0..10 {
            let occasions: &[&str] = if i % 3 == 1 { &["Birthday"] } else { &["Wedding"] };
            cards.push(card(&format!("v{i}"), "Cebu City", occasions));
        }
        let bp = SectionBlueprint::new("bday", "Birthday bashes", 8);
        let section = rank_section(&bp, &cards);

        assert_eq!(section.venues.len(), 8);
        assert_eq!(section.placeholder_count(), 0);
        assert_eq!(&ids(&section)[..3], &["v1", "v4", "v7"]);
        assert_eq!(&ids(&section)[3..], &["v0", "v2", "v3", "v5", "v6"]);
    }

    #[test]
    fn shortfall_is_padded_with_numbered_placeholders() {
        let cards = vec![card("a", "Manila", &[]), card("b", "Davao", &[])];
        let bp = SectionBlueprint::new("weddings", "Dream Wedding venues", 8);
        let section = rank_section(&bp, &cards);

        assert_eq!(section.venues.len(), 8);
        assert_eq!(&ids(&section)[..2], &["a", "b"]);
        let expected = (1..=6)
            .map(|n| format!("weddings-placeholder-{n}"))
            .collect::<Vec<_>>();
        assert_eq!(
            ids(&section)[2..].iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            expected
        );
    }

    #[test]
    fn city_and_occasion_chain_orders_by_specificity() {
        let cards = vec![
            card("other-bday", "Manila", &["Birthday"]),
            card("cebu-plain", "Cebu City", &["Wedding"]),
            card("cebu-bday", "Cebu City", &["Birthday Party"]),
            card("manila-plain", "Manila", &[]),
        ];
        let bp = SectionBlueprint::new("bc", "Popular Birthday venues in Cebu City", 3);
        let section = rank_section(&bp, &cards);
        assert_eq!(ids(&section), vec!["cebu-bday", "cebu-plain", "other-bday"]);
    }

    #[test]
    fn unfiltered_blueprint_uses_full_set_in_order() {
        let cards = vec![card("z", "", &[]), card("y", "", &[]), card("x", "", &[])];
        let bp = SectionBlueprint::new("recent", "Recently added", 2);
        assert_eq!(ids(&rank_section(&bp, &cards)), vec!["z", "y"]);
    }

    #[test]
    fn duplicate_ids_appear_once_per_section() {
        let cards = vec![
            card("dup", "Cebu City", &["Wedding"]),
            card("dup", "Cebu City", &["Wedding"]),
            card("solo", "Cebu City", &[]),
        ];
        let bp = SectionBlueprint::new("w", "Wedding venues", 4);
        let section = rank_section(&bp, &cards);
        let unique: HashSet<&str> = ids(&section).into_iter().collect();
        assert_eq!(unique.len(), 4);
        assert_eq!(section.real_venue_count(), 2);
    }

    #[test]
    fn placeholder_numbers_skip_ids_already_taken() {
        let cards = vec![card("p-placeholder-1", "", &[])];
        let section = rank_section(&SectionBlueprint::new("p", "Anything", 3), &cards);
        assert_eq!(ids(&section), vec!["p-placeholder-1", "p-placeholder-2", "p-placeholder-3"]);
    }

    #[test]
    fn every_section_has_exact_card_count_even_when_empty() {
        for count in [0, 1, 5, 12] {
            let sections = rank_sections(
                &[
                    SectionBlueprint::new("a", "Cebu", count),
                    SectionBlueprint::new("b", "Wedding", count),
                    SectionBlueprint::new("c", "Misc", count),
                ],
                &[],
            );
            assert!(sections.iter().all(|s| s.venues.len() == count));
        }
    }

    #[test]
    fn blueprint_yaml_rejects_duplicate_ids() {
        let ok = parse_blueprints_yaml(
            "blueprints:\n  - id: a\n    title: Cebu\n    card_count: 4\n",
        )
        .unwrap();
        assert_eq!(ok, vec![SectionBlueprint::new("a", "Cebu", 4)]);

        let dup = parse_blueprints_yaml(
            "blueprints:\n  - id: a\n    title: X\n    card_count: 1\n  - id: a\n    title: Y\n    card_count: 1\n",
        );
        assert!(dup.is_err());
    }
}
