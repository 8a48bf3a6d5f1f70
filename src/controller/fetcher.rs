//! Injected producer of a resource value

use async_trait::async_trait;
use std::future::Future;

use crate::error::Result;

/// Produces a fresh value for one resource.
///
/// Called repeatedly over a controller's lifetime, so it must be safe to
/// retry. Any async closure `Fn() -> impl Future<Output = Result<T>>` works.
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    async fn fetch(&self) -> Result<T>;
}

#[async_trait]
impl<T, F, Fut> Fetcher<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send,
{
    async fn fetch(&self) -> Result<T> {
        (self)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct Fixed(&'static str);

    #[async_trait]
    impl Fetcher<String> for Fixed {
        async fn fetch(&self) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_closure_fetcher() {
        let fetcher = || async { Ok::<_, Error>(42u32) };
        assert_eq!(fetcher.fetch().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_struct_fetcher() {
        let fetcher: Box<dyn Fetcher<String>> = Box::new(Fixed("rooms"));
        assert_eq!(fetcher.fetch().await.unwrap(), "rooms");
    }
}
