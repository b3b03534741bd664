//! Paginated listing.
//!
//! List APIs return a page of items plus a continuation token. [`paginate`]
//! flattens that into a stream of items; [`for_each_page`] is the callback
//! form whose callback decides whether to keep going.

use std::future::Future;

use futures::stream::{self, Stream, TryStreamExt};

use crate::error::ProviderError;

/// One page of a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// The items in this page.
    pub items: Vec<T>,
    /// Token for the next page; `None` or empty on the last page.
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    /// A page followed by `next_token`.
    pub fn new(items: Vec<T>, next_token: Option<String>) -> Self {
        Self { items, next_token }
    }

    /// A final page.
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }
}

enum Cursor {
    Next(Option<String>),
    Done,
}

fn advance(current: &Option<String>, next: Option<String>) -> Cursor {
    match next.filter(|t| !t.is_empty()) {
        // Some services echo the last token forever.
        Some(token) if current.as_deref() == Some(token.as_str()) => Cursor::Done,
        Some(token) => Cursor::Next(Some(token)),
        None => Cursor::Done,
    }
}

/// Stream every item of a paginated list call.
///
/// `fetch` receives the continuation token (`None` for the first page).
/// The stream ends after the last page or at the first error.
pub fn paginate<T, F, Fut>(fetch: F) -> impl Stream<Item = Result<T, ProviderError>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ProviderError>>,
{
    stream::try_unfold((fetch, Cursor::Next(None)), |(mut fetch, cursor)| async move {
        let Cursor::Next(token) = cursor else {
            return Ok::<_, ProviderError>(None);
        };
        let page = fetch(token.clone()).await?;
        let next = advance(&token, page.next_token);
        Ok::<_, ProviderError>(Some((page.items, (fetch, next))))
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
}

/// Collect every item of a paginated list call.
pub async fn list_all<T, F, Fut>(fetch: F) -> Result<Vec<T>, ProviderError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ProviderError>>,
{
    paginate(fetch).try_collect().await
}

/// Call `callback` with each page's items and whether it is the last page.
/// Stops when the callback returns `false`.
pub async fn for_each_page<T, F, Fut, C>(mut fetch: F, mut callback: C) -> Result<(), ProviderError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ProviderError>>,
    C: FnMut(Vec<T>, bool) -> bool,
{
    let mut token = None;
    loop {
        let page = fetch(token.clone()).await?;
        match advance(&token, page.next_token) {
            Cursor::Next(next) => {
                if !callback(page.items, false) {
                    return Ok(());
                }
                token = next;
            }
            Cursor::Done => {
                callback(page.items, true);
                return Ok(());
            }
        }
    }
}
