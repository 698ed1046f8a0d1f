//! robots.txt parsing and a per-origin cache with single-flight refresh.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use engine_logging::{engine_debug, engine_warn};
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::decode::decode_output;
use crate::fetch::{FetchRequest, Fetcher};
use crate::FailureKind;

pub const DEFAULT_ROBOTS_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const UNREACHABLE_TTL: Duration = Duration::from_secs(5 * 60);

/// One `User-agent` group and its rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsGroup {
    pub agents: Vec<String>,
    pub allow: Vec<String>,
    pub disallow: Vec<String>,
    pub crawl_delay: Option<f64>,
}

impl RobotsGroup {
    /// Longest matching rule wins; on equal length Allow wins.
    pub fn is_allowed(&self, path: &str) -> bool {
        let longest = |rules: &[String]| {
            rules
                .iter()
                .filter(|pattern| path_matches(path, pattern))
                .map(|pattern| pattern.len())
                .max()
        };
        match (longest(&self.allow), longest(&self.disallow)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(allow), Some(disallow)) => allow >= disallow,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsTxt {
    pub groups: Vec<RobotsGroup>,
    pub sitemaps: Vec<String>,
}

impl RobotsTxt {
    pub fn parse(txt: &str) -> Self {
        let mut robots = RobotsTxt::default();
        let mut current: Option<RobotsGroup> = None;
        // Consecutive User-agent lines share one group.
        let mut collecting_agents = false;

        for raw in txt.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !collecting_agents {
                        if let Some(group) = current.take() {
                            robots.groups.push(group);
                        }
                        current = Some(RobotsGroup::default());
                    }
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                    collecting_agents = true;
                }
                "allow" | "disallow" | "crawl-delay" => {
                    collecting_agents = false;
                    let Some(group) = current.as_mut() else {
                        continue;
                    };
                    match key.as_str() {
                        "allow" if !value.is_empty() => group.allow.push(value.to_string()),
                        // An empty Disallow permits everything; nothing to record.
                        "disallow" if !value.is_empty() => group.disallow.push(value.to_string()),
                        "crawl-delay" => {
                            if let Ok(delay) = value.parse::<f64>() {
                                if delay.is_finite() && delay >= 0.0 {
                                    group.crawl_delay = Some(delay);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                "sitemap" => {
                    if !value.is_empty() {
                        robots.sitemaps.push(value.to_string());
                    }
                }
                _ => {}
            }
        }
        if let Some(group) = current.take() {
            robots.groups.push(group);
        }
        robots
    }

    /// Most specific group for `user_agent`: exact product token, then `*`,
    /// then a substring match either way.
    pub fn group_for(&self, user_agent: &str) -> Option<&RobotsGroup> {
        let token = product_token(user_agent);
        let has = |pred: &dyn Fn(&str) -> bool| {
            self.groups
                .iter()
                .find(|group| group.agents.iter().any(|agent| pred(agent)))
        };
        has(&|agent| agent == token)
            .or_else(|| has(&|agent| agent == "*"))
            .or_else(|| {
                if token.is_empty() {
                    return None;
                }
                has(&|agent| {
                    agent != "*" && (token.contains(agent) || agent.contains(token.as_str()))
                })
            })
    }

    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        self.group_for(user_agent)
            .map(|group| group.is_allowed(path))
            .unwrap_or(true)
    }

    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        self.group_for(user_agent).and_then(|group| group.crawl_delay)
    }
}

/// `PlanningDataBot/1.0 (+https://...)` -> `planningdatabot`.
fn product_token(user_agent: &str) -> String {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// robots.txt path pattern: prefix match with `*` wildcards and a `$` end anchor.
fn path_matches(path: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };
    let tail: Vec<&str> = parts.collect();
    if tail.is_empty() {
        return !anchored || rest.is_empty();
    }
    for (i, part) in tail.iter().enumerate() {
        let last = i == tail.len() - 1;
        if last && anchored {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}

#[derive(Debug, Clone, PartialEq)]
pub enum RobotsStatus {
    Present(RobotsTxt),
    /// 4xx on robots.txt: no restrictions published.
    Missing,
    /// Transport failure or 5xx; treated as allowed with a warning.
    Unreachable(String),
}

#[derive(Debug)]
struct CachedRobots {
    status: Arc<RobotsStatus>,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    cell: OnceCell<CachedRobots>,
}

/// robots.txt per origin. Concurrent lookups for the same origin share one
/// in-flight fetch.
pub struct RobotsCache {
    fetcher: Arc<dyn Fetcher>,
    ttl: Duration,
    timeout: Duration,
    user_agent: String,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    fetches: AtomicUsize,
}

impl RobotsCache {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        ttl: Duration,
        timeout: Duration,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            ttl,
            timeout,
            user_agent: user_agent.into(),
            slots: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Number of robots.txt downloads performed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn invalidate(&self, origin: &str) {
        self.lock_slots().remove(origin);
    }

    pub async fn get(&self, origin: &str) -> Arc<RobotsStatus> {
        self.get_as(origin, &self.user_agent).await
    }

    /// Like [`RobotsCache::get`], identifying as `user_agent` if a download
    /// is needed. Cached entries are shared whoever fetched them.
    pub async fn get_as(&self, origin: &str, user_agent: &str) -> Arc<RobotsStatus> {
        let slot = {
            let mut slots = self.lock_slots();
            let fresh = slots
                .get(origin)
                .filter(|slot| match slot.cell.get() {
                    Some(cached) => cached.fetched_at.elapsed() < self.ttl_for(&cached.status),
                    // Still being fetched by someone else; join them.
                    None => true,
                })
                .cloned();
            match fresh {
                Some(slot) => slot,
                None => {
                    let slot = Arc::new(Slot::default());
                    slots.insert(origin.to_string(), slot.clone());
                    slot
                }
            }
        };

        let cached = slot
            .cell
            .get_or_init(|| async {
                let status = self.download(origin, user_agent).await;
                CachedRobots {
                    status: Arc::new(status),
                    fetched_at: Instant::now(),
                }
            })
            .await;
        cached.status.clone()
    }

    fn ttl_for(&self, status: &RobotsStatus) -> Duration {
        match status {
            RobotsStatus::Unreachable(_) => self.ttl.min(UNREACHABLE_TTL),
            _ => self.ttl,
        }
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Slot>>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn download(&self, origin: &str, user_agent: &str) -> RobotsStatus {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let url = format!("{}/robots.txt", origin.trim_end_matches('/'));
        let request = FetchRequest::get(&url, self.timeout)
            .with_headers([("User-Agent".to_string(), user_agent.to_string())]);
        engine_debug!("fetching {}", url);

        match self.fetcher.fetch(&request).await {
            Ok(output) => match decode_output(&output) {
                Ok(body) => RobotsStatus::Present(RobotsTxt::parse(&body.text)),
                // An empty robots.txt publishes no rules.
                Err(_) => RobotsStatus::Missing,
            },
            Err(err) => match err.kind {
                FailureKind::HttpStatus(code) if (400..500).contains(&code) => {
                    RobotsStatus::Missing
                }
                _ => {
                    engine_warn!("robots.txt unreachable for {}: {}", origin, err);
                    RobotsStatus::Unreachable(err.to_string())
                }
            },
        }
    }
}
