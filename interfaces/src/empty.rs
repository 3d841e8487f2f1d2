use async_trait::async_trait;

use crate::defs::Article;
use crate::defs::EmbeddingHook;
use crate::defs::NotifyService;

pub struct NoopNotifier;

#[async_trait]
impl NotifyService for NoopNotifier {
    async fn notify(&self, _article: &Article) {
        // Nobody is subscribed.
    }
}

pub struct NoopEmbeddingHook;

#[async_trait]
impl EmbeddingHook for NoopEmbeddingHook {
    async fn index(&self, _article: &Article) {}
}
