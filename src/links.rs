//! Bulk link validation over a bounded rayon pool. Each bookmark gets a
//! cheap HEAD probe first; servers that reject HEAD get one GET before the
//! link is declared dead.

use std::time::Duration;

use rayon::prelude::*;

use crate::bookmarks::BookmarkCollection;
use crate::config::LinksConfig;

#[derive(Debug, Default)]
pub struct ValidationSummary {
    pub checked: usize,
    pub dead: usize,
}

pub fn validate_links(
    bookmarks: &dyn BookmarkCollection,
    config: &LinksConfig,
) -> anyhow::Result<ValidationSummary> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let urls: Vec<String> = bookmarks.all().into_iter().map(|b| b.url).collect();
    if urls.is_empty() {
        return Ok(ValidationSummary::default());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()?;

    let results: Vec<(String, bool)> = pool.install(|| {
        urls.into_par_iter()
            .map(|url| {
                let alive = probe(&client, &url);
                (url, alive)
            })
            .collect()
    });

    let mut summary = ValidationSummary::default();
    for (url, alive) in results {
        summary.checked += 1;
        if !alive {
            summary.dead += 1;
            log::info!("dead link: {url}");
        }
        bookmarks.set_validity(&url, alive);
    }
    bookmarks.save()?;

    Ok(summary)
}

/// HEAD first; a 4xx/5xx answer gets a GET retry since plenty of servers
/// refuse HEAD outright. Network errors count as dead.
fn probe(client: &reqwest::blocking::Client, url: &str) -> bool {
    match client.head(url).send() {
        Ok(response) if response.status().is_success() || response.status().is_redirection() => {
            return true;
        }
        Ok(_) | Err(_) => {}
    }

    match client.get(url).send() {
        Ok(response) => response.status().as_u16() < 400,
        Err(err) => {
            log::debug!("probe failed for {url}: {err}");
            false
        }
    }
}
