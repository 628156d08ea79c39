use crate::types::GeoInfo;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_LOCATIONS_URL: &str = "https://locations-adw.pages.dev/";

/// Localized city names for common datacenter codes, used when the geo
/// database had no localized name.
const LOCALIZED_CITY_NAMES: &[(&str, &str)] = &[
    ("SIN", "新加坡"),
    ("HKG", "香港"),
    ("NRT", "东京"),
    ("ICN", "首尔"),
    ("BOM", "孟买"),
    ("DEL", "新德里"),
    ("SYD", "悉尼"),
    ("MEL", "墨尔本"),
    ("LHR", "伦敦"),
    ("CDG", "巴黎"),
    ("FRA", "法兰克福"),
    ("AMS", "阿姆斯特丹"),
    ("JFK", "纽约"),
    ("LAX", "洛杉矶"),
    ("SFO", "旧金山"),
    ("ORD", "芝加哥"),
    ("DFW", "达拉斯"),
    ("DXB", "迪拜"),
    ("DOH", "多哈"),
    ("BKK", "曼谷"),
    ("KUL", "吉隆坡"),
    ("CGK", "雅加达"),
    ("MNL", "马尼拉"),
    ("SGN", "胡志明市"),
    ("HAN", "河内"),
    ("TPE", "台北"),
    ("PVG", "上海"),
    ("PEK", "北京"),
    ("CAN", "广州"),
    ("SZX", "深圳"),
    ("CTU", "成都"),
    ("XIY", "西安"),
    ("KMG", "昆明"),
    ("KIX", "大阪"),
    ("NGO", "名古屋"),
    ("FCO", "罗马"),
    ("BCN", "巴塞罗那"),
    ("MAD", "马德里"),
    ("IST", "伊斯坦布尔"),
    ("CAI", "开罗"),
    ("JNB", "约翰内斯堡"),
];

fn usable(s: &str) -> bool {
    !s.is_empty() && !s.contains('\u{FFFD}') && !s.contains("锟斤拷")
}

pub fn localized_city_name(datacenter: &str) -> Option<&'static str> {
    LOCALIZED_CITY_NAMES
        .iter()
        .find(|(code, _)| *code == datacenter)
        .map(|(_, name)| *name)
}

/// Human label for a datacenter: localized city, built-in name for the code,
/// English city, then the code itself. Garbled values are skipped.
pub fn city_label(city_localized: &str, city: &str, datacenter: &str) -> String {
    if usable(city_localized) {
        return city_localized.to_string();
    }
    if let Some(name) = localized_city_name(datacenter) {
        return name.to_string();
    }
    if usable(city) {
        return city.to_string();
    }
    if usable(datacenter) {
        return datacenter.to_string();
    }
    "Unknown".to_string()
}

/// One record of the datacenter location database.
///
/// The upstream file names the localized fields `region_zh`, `city_zh` and
/// `emoji`; both spellings are accepted.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Location {
    pub iata: String,
    pub lat: f64,
    pub lon: f64,
    pub cca2: String,
    pub region: String,
    pub city: String,
    #[serde(alias = "region_zh")]
    pub region_localized: String,
    pub country: String,
    #[serde(alias = "city_zh")]
    pub city_localized: String,
    #[serde(alias = "emoji")]
    pub flag: String,
}

impl Location {
    pub fn geo_info(&self) -> GeoInfo {
        GeoInfo {
            region: self.region.clone(),
            city: self.city.clone(),
            region_localized: self.region_localized.clone(),
            country: self.country.clone(),
            city_localized: self.city_localized.clone(),
            flag: self.flag.clone(),
        }
    }
}

/// Read-only lookup from datacenter code to location metadata.
#[derive(Debug, Clone, Default)]
pub struct GeoResolver {
    by_iata: HashMap<String, Location>,
}

impl GeoResolver {
    pub fn from_locations(locations: Vec<Location>) -> Self {
        let by_iata = locations
            .into_iter()
            .filter(|l| !l.iata.is_empty())
            .map(|l| (l.iata.clone(), l))
            .collect();
        Self { by_iata }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let locations: Vec<Location> =
            serde_json::from_slice(bytes).context("failed to parse locations JSON")?;
        Ok(Self::from_locations(locations))
    }

    pub fn lookup(&self, datacenter: &str) -> Option<&Location> {
        self.by_iata.get(datacenter)
    }

    pub fn len(&self) -> usize {
        self.by_iata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_iata.is_empty()
    }

    /// Load from the cache file when present, otherwise download from `url`
    /// and write the cache. Any failure here aborts the run.
    pub async fn load_or_fetch(cache: &Path, url: &str) -> Result<Self> {
        if tokio::fs::try_exists(cache).await.unwrap_or(false) {
            tracing::info!(path = %cache.display(), "using cached locations database");
            let bytes = tokio::fs::read(cache)
                .await
                .with_context(|| format!("failed to read {}", cache.display()))?;
            return Self::from_json(&bytes);
        }

        tracing::info!(%url, "locations database not cached, downloading");
        let resp = reqwest::get(url)
            .await
            .with_context(|| format!("failed to fetch locations from {url}"))?;
        if !resp.status().is_success() {
            bail!("failed to fetch locations from {url}: status {}", resp.status());
        }
        let bytes = resp.bytes().await.context("failed to read locations response")?;
        let resolver = Self::from_json(&bytes)?;
        tokio::fs::write(cache, &bytes)
            .await
            .with_context(|| format!("failed to write {}", cache.display()))?;
        Ok(resolver)
    }
}
