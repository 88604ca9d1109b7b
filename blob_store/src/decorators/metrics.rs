use async_trait::async_trait;
use ::metrics::{blobstore::Metrics, Increment, Timer};
use opentelemetry::KeyValue;

use crate::{BlobContent, BlobResult, Blobstore, ByteStream, NoRedirectBlobstore};

/// Records latency and failures of every call on the wrapped store.
pub struct MetricsBlobstore<B> {
    inner: B,
    resource: &'static str,
    metrics: Metrics,
}

impl<B> MetricsBlobstore<B> {
    pub fn new(inner: B, resource: &'static str) -> Self {
        Self {
            inner,
            resource,
            metrics: Metrics::new(),
        }
    }

    fn labels(&self, op: &'static str) -> [KeyValue; 2] {
        [
            KeyValue::new("op", op),
            KeyValue::new("resource", self.resource),
        ]
    }

    fn observe<T>(&self, op: &'static str, result: BlobResult<T>) -> BlobResult<T> {
        if let Err(err) = &result {
            self.metrics.errors.inc(&[
                KeyValue::new("op", op),
                KeyValue::new("resource", self.resource),
                KeyValue::new("kind", err.kind()),
            ]);
        }
        result
    }
}

#[async_trait]
impl<B: NoRedirectBlobstore> NoRedirectBlobstore for MetricsBlobstore<B> {
    async fn exists(&self, path: &str) -> BlobResult<bool> {
        let labels = self.labels("exists");
        let _timer = Timer::start_with_labels(&self.metrics.operations, &labels);
        self.observe("exists", self.inner.exists(path).await)
    }

    async fn get(&self, path: &str) -> BlobResult<ByteStream> {
        let labels = self.labels("get");
        let _timer = Timer::start_with_labels(&self.metrics.operations, &labels);
        self.observe("get", self.inner.get(path).await)
    }

    async fn put(&self, path: &str, content: ByteStream) -> BlobResult<()> {
        let labels = self.labels("put");
        let _timer = Timer::start_with_labels(&self.metrics.operations, &labels);
        self.observe("put", self.inner.put(path, content).await)
    }

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<()> {
        let labels = self.labels("copy");
        let _timer = Timer::start_with_labels(&self.metrics.operations, &labels);
        self.observe("copy", self.inner.copy(src, dest).await)
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        let labels = self.labels("delete");
        let _timer = Timer::start_with_labels(&self.metrics.operations, &labels);
        self.observe("delete", self.inner.delete(path).await)
    }

    async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        let labels = self.labels("delete_dir");
        let _timer = Timer::start_with_labels(&self.metrics.operations, &labels);
        self.observe("delete_dir", self.inner.delete_dir(prefix).await)
    }
}

#[async_trait]
impl<B: Blobstore> Blobstore for MetricsBlobstore<B> {
    async fn head_or_redirect_as_get(&self, path: &str) -> BlobResult<Option<String>> {
        let labels = self.labels("head");
        let _timer = Timer::start_with_labels(&self.metrics.operations, &labels);
        self.observe("head", self.inner.head_or_redirect_as_get(path).await)
    }

    async fn get_or_redirect(&self, path: &str) -> BlobResult<BlobContent> {
        let labels = self.labels("get_or_redirect");
        let _timer = Timer::start_with_labels(&self.metrics.operations, &labels);
        self.observe("get_or_redirect", self.inner.get_or_redirect(path).await)
    }
}
