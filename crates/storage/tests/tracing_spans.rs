//! Verifies that `MemoryBackend` operations emit tracing spans.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use identity_directory_storage::{MemoryBackend, StorageBackend};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

#[tokio::test]
async fn memory_backend_operations_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    let mut txn = backend.transaction().await.expect("transaction");
    txn.set(b"key-1".to_vec(), b"value-1".to_vec());
    txn.commit().await.expect("commit");
    backend.get(b"key-1").await.expect("get");
    backend.get_prefix(b"key-").await.expect("prefix scan");

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["transaction", "get", "get_range"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}
