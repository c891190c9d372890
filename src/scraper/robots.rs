//! robots.txt compliance

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::traits::CrawlPolicy;

/// Allow/Disallow rules of the group that applies to our user agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

impl RobotsRules {
    /// Everything permitted, used when robots.txt is missing or unreachable.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse a robots.txt body and keep the group matching `agent_token`,
    /// falling back to the `*` group.
    pub fn parse(body: &str, agent_token: &str) -> Self {
        let agent_token = agent_token.to_ascii_lowercase();
        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        let mut in_agent_lines = false;

        for raw in body.lines() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match field.trim().to_ascii_lowercase().as_str() {
                "user-agent" => {
                    if !in_agent_lines && !current.agents.is_empty() {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.agents.push(value.to_ascii_lowercase());
                    in_agent_lines = true;
                }
                field @ ("allow" | "disallow") => {
                    in_agent_lines = false;
                    // An empty Disallow permits everything and adds no rule.
                    if !value.is_empty() {
                        current.rules.push(Rule {
                            allow: field == "allow",
                            pattern: value.to_string(),
                        });
                    }
                }
                _ => in_agent_lines = false,
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }

        let specific = groups.iter().position(|g| {
            g.agents
                .iter()
                .any(|a| a != "*" && !a.is_empty() && agent_token.contains(a.as_str()))
        });
        let wildcard = groups.iter().position(|g| g.agents.iter().any(|a| a == "*"));

        specific
            .or(wildcard)
            .map(|idx| Self {
                rules: std::mem::take(&mut groups[idx].rules),
            })
            .unwrap_or_default()
    }

    /// Longest matching rule decides; Allow wins a tie.
    pub fn allows(&self, path: &str) -> bool {
        self.rules
            .iter()
            .filter(|rule| pattern_matches(&rule.pattern, path))
            .max_by_key(|rule| (rule.pattern.len(), rule.allow))
            .is_none_or(|rule| rule.allow)
    }
}

/// robots.txt path pattern with `*` wildcards and a `$` end anchor.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let mut pieces = pattern.split('*');
    let first = pieces.next().unwrap_or_default();
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };

    let pieces: Vec<&str> = pieces.collect();
    for (idx, piece) in pieces.iter().enumerate() {
        let last = idx + 1 == pieces.len();
        if last && anchored {
            return rest.ends_with(piece);
        }
        match rest.find(piece) {
            Some(at) => rest = &rest[at + piece.len()..],
            None => return false,
        }
    }

    !anchored || rest.is_empty()
}

type CachedRules = Arc<OnceCell<Arc<RobotsRules>>>;

/// Fetches and caches robots.txt per origin for the lifetime of a run.
///
/// Concurrent checks against one origin share a single fetch.
pub struct RobotsChecker {
    client: Client,
    agent_token: String,
    cache: Mutex<HashMap<String, CachedRules>>,
}

impl RobotsChecker {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(10))
            .build()?;

        // Product token is the part before the version slash
        let agent_token = user_agent
            .split(['/', ' '])
            .next()
            .unwrap_or(user_agent)
            .to_string();

        Ok(Self {
            client,
            agent_token,
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn rules_for(&self, origin: &str) -> Arc<RobotsRules> {
        let cell = Arc::clone(self.cache.lock().await.entry(origin.to_string()).or_default());

        // The map lock is released; other origins are not held up by this fetch
        let rules = cell
            .get_or_init(|| async { Arc::new(self.fetch_rules(origin).await) })
            .await;
        Arc::clone(rules)
    }

    async fn fetch_rules(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{origin}/robots.txt");

        let response = match self.client.get(&robots_url).send().await {
            Ok(response) => response,
            Err(e) => {
                info!("Could not fetch {} ({}) - proceeding", robots_url, e);
                return RobotsRules::allow_all();
            }
        };

        if !response.status().is_success() {
            info!(
                "No robots.txt at {} (status {}) - proceeding",
                robots_url,
                response.status()
            );
            return RobotsRules::allow_all();
        }

        match response.text().await {
            Ok(body) => RobotsRules::parse(&body, &self.agent_token),
            Err(e) => {
                info!("Could not read {} ({}) - proceeding", robots_url, e);
                RobotsRules::allow_all()
            }
        }
    }
}

#[async_trait]
impl CrawlPolicy for RobotsChecker {
    async fn allows(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            warn!("Cannot check robots.txt for malformed URL {}", url);
            return false;
        };

        let origin = parsed.origin().ascii_serialization();
        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        let allowed = self.rules_for(&origin).await.allows(&path);
        if !allowed {
            warn!("robots.txt disallows scraping {}", url);
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "
# comment line
User-agent: *
Disallow: /checkout
Disallow: /*.pdf$
Allow: /checkout/public

User-agent: BadBot
User-agent: TicketPriceMonitor
Disallow: /tickets/private
";

    #[test]
    fn wildcard_group_applies_to_unknown_agents() {
        let rules = RobotsRules::parse(ROBOTS, "SomeCrawler");

        assert!(rules.allows("/en/football/champions-league"));
        assert!(!rules.allows("/checkout/cart"));
        assert!(rules.allows("/checkout/public/info"));
        assert!(!rules.allows("/brochure/terms.pdf"));
        assert!(rules.allows("/brochure/terms.pdf?download=1"));
    }

    #[test]
    fn specific_group_replaces_wildcard_group() {
        let rules = RobotsRules::parse(ROBOTS, "TicketPriceMonitor");

        assert!(rules.allows("/checkout/cart"));
        assert!(!rules.allows("/tickets/private/vip"));
    }

    #[test]
    fn empty_disallow_permits_everything() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n", "TicketPriceMonitor");

        assert!(rules.allows("/anything"));
    }

    #[test]
    fn allow_wins_a_tie() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /page\nAllow: /page\n",
            "TicketPriceMonitor",
        );

        assert!(rules.allows("/page"));
    }

    #[test]
    fn patterns_support_wildcards_and_anchors() {
        assert!(pattern_matches("/tickets/*/vip", "/tickets/arsenal/vip/extra"));
        assert!(!pattern_matches("/tickets/*/vip$", "/tickets/arsenal/vip/extra"));
        assert!(pattern_matches("/tickets/*/vip$", "/tickets/arsenal/vip"));
        assert!(pattern_matches("/", "/anything"));
        assert!(!pattern_matches("/exact$", "/exactly"));
    }

    #[test]
    fn empty_file_allows_everything() {
        assert_eq!(RobotsRules::parse("", "TicketPriceMonitor"), RobotsRules::allow_all());
    }

    #[tokio::test]
    async fn concurrent_checks_fetch_robots_once_per_origin() {
        let mut server = mockito::Server::new_async().await;
        let robots = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body_from_request(|_| {
                std::thread::sleep(Duration::from_millis(200));
                b"User-agent: *\nDisallow: /private\n".to_vec()
            })
            .expect(1)
            .create_async()
            .await;
        let checker = RobotsChecker::new(crate::config::DEFAULT_USER_AGENT).unwrap();
        let base = server.url();

        let url_a = format!("{base}/tickets/arsenal");
        let url_b = format!("{base}/tickets/chelsea");
        let url_c = format!("{base}/private/vip");
        let (first, second, third) = tokio::join!(
            checker.allows(&url_a),
            checker.allows(&url_b),
            checker.allows(&url_c),
        );

        assert!(first);
        assert!(second);
        assert!(!third);
        assert!(checker.allows(&format!("{base}/tickets/city")).await);
        robots.assert_async().await;
    }

    #[tokio::test]
    async fn missing_robots_file_allows_and_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let robots = server
            .mock("GET", "/robots.txt")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let checker = RobotsChecker::new(crate::config::DEFAULT_USER_AGENT).unwrap();
        let base = server.url();

        assert!(checker.allows(&format!("{base}/checkout")).await);
        assert!(checker.allows(&format!("{base}/tickets")).await);
        robots.assert_async().await;
    }
}
