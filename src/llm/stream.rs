//! Lazy token streams.

use crate::error::AppResult;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::fmt;

/// A finite, lazily produced sequence of text fragments.
///
/// Nothing is pulled until the consumer polls; [`drain`](Self::drain)
/// assembles the full text.
pub struct TokenStream {
    inner: BoxStream<'static, AppResult<String>>,
}

impl TokenStream {
    pub fn new(inner: BoxStream<'static, AppResult<String>>) -> Self {
        Self { inner }
    }

    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Self::new(stream::iter(fragments.into_iter().map(Ok)).boxed())
    }

    /// Next fragment, or `None` once the stream is exhausted.
    pub async fn next_fragment(&mut self) -> Option<AppResult<String>> {
        self.inner.next().await
    }

    /// Concatenate every fragment. The first error aborts the drain.
    pub async fn drain(mut self) -> AppResult<String> {
        let mut text = String::new();
        while let Some(fragment) = self.inner.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn test_drain_concatenates() {
        let stream = TokenStream::from_fragments(vec!["SEL".to_string(), "ECT 1".to_string()]);
        assert_eq!(stream.drain().await.unwrap(), "SELECT 1");
    }

    #[tokio::test]
    async fn test_drain_stops_at_error() {
        let items: Vec<AppResult<String>> = vec![
            Ok("a".to_string()),
            Err(AppError::model(Some(500), "boom")),
            Ok("b".to_string()),
        ];
        let stream = TokenStream::new(stream::iter(items).boxed());
        assert!(stream.drain().await.is_err());
    }
}
