//! In-memory stand-ins for the outbound capabilities, used by unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{FetchError, OriginError};
use crate::fetch_timeout::{HttpClient, HttpResponse};
use crate::origin::{ObjectStore, StoredObject};

type Responder =
    dyn Fn(&str, &[(&'static str, String)]) -> Result<HttpResponse, FetchError> + Send + Sync;

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

pub(crate) struct FakeHttpClient {
    responder: Box<Responder>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeHttpClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &[(&'static str, String)]) -> Result<HttpResponse, FetchError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn get(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<HttpResponse, FetchError> {
        self.calls.lock().unwrap().push(RecordedCall {
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        (self.responder)(url, headers)
    }
}

pub(crate) fn image_response(content_type: &str, body: Vec<u8>) -> HttpResponse {
    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), content_type.to_string());
    HttpResponse {
        status: 200,
        headers,
        body,
    }
}

#[derive(Default)]
pub(crate) struct MemoryObjectStore {
    objects: HashMap<(String, String), StoredObject>,
    gets: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn with_object(mut self, bucket: &str, key: &str, object: StoredObject) -> Self {
        self.objects
            .insert((bucket.to_string(), key.to_string()), object);
        self
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<StoredObject>, OriginError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }
}

/// Encode a small solid-color test image
pub(crate) fn encoded_image(format: image::ImageOutputFormat, width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([200, 40, 90]),
    ));
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}
