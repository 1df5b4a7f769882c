use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{decode, ArmClient};
use crate::error::ArmError;

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

/// Iterates an ARM list result (`{ "value": [...], "nextLink": "..." }`)
/// page by page, in server order.
pub struct Pager<T> {
    client: ArmClient,
    next:   Option<String>,
    pages:  usize,
    _item:  PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Pager<T> {
    pub fn new(client: ArmClient, first_url: String) -> Self {
        Self {
            client,
            next: Some(first_url),
            pages: 0,
            _item: PhantomData,
        }
    }

    /// Whether another page remains to be fetched.
    pub fn more(&self) -> bool {
        self.next.is_some()
    }

    /// Fetch the next page. Returns an empty page once exhausted.
    pub async fn next_page(&mut self) -> Result<Vec<T>, ArmError> {
        let Some(url) = self.next.take() else {
            return Ok(Vec::new());
        };

        let body = self.client.get_value(&url).await?;
        let page: Page = decode(&url, body)?;
        self.pages += 1;

        self.next = match page.next_link {
            Some(link) if link.is_empty() => None,
            Some(link) if link == url => {
                warn!(url = %url, "nextLink repeats the current page, stopping");
                None
            }
            other => other,
        };
        debug!(url = %url, page = self.pages, items = page.value.len(), "fetched ARM list page");

        page.value
            .into_iter()
            .map(|item| decode(&url, item))
            .collect()
    }

    /// Drain every page. Any page error aborts the whole listing.
    pub async fn collect_all(mut self) -> Result<Vec<T>, ArmError> {
        let mut all = Vec::new();
        while self.more() {
            all.extend(self.next_page().await?);
        }
        Ok(all)
    }
}
