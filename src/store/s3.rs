use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{services::S3, Entry, Lister, Operator};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::store::backend::{DeleteOutcome, ListPage, ObjectRecord, ObjectStore};
use crate::store::error::StoreError;

/// S3-compatible storage providers
#[derive(Debug, Clone, PartialEq)]
pub enum S3Provider {
    Aws,
    DigitalOcean,
    Hetzner,
    MinIO,
    CloudflareR2,
    Wasabi,
    Custom { name: String, endpoint: String },
}

impl S3Provider {
    /// Parse the `--provider` flag. `custom` needs an explicit endpoint.
    pub fn parse(name: &str, endpoint: Option<&str>) -> Option<Self> {
        let provider = match name.to_ascii_lowercase().as_str() {
            "aws" | "s3" => S3Provider::Aws,
            "digitalocean" | "do" | "spaces" => S3Provider::DigitalOcean,
            "hetzner" => S3Provider::Hetzner,
            "minio" => S3Provider::MinIO,
            "r2" | "cloudflare" => S3Provider::CloudflareR2,
            "wasabi" => S3Provider::Wasabi,
            "custom" => S3Provider::Custom {
                name: "S3".to_string(),
                endpoint: endpoint?.to_string(),
            },
            _ => return None,
        };
        Some(provider)
    }

    /// Get the endpoint URL for this provider
    pub fn endpoint(&self, region: &str) -> Option<String> {
        match self {
            S3Provider::Aws => None, // Use default AWS endpoint
            S3Provider::DigitalOcean => Some(format!("https://{}.digitaloceanspaces.com", region)),
            S3Provider::Hetzner => Some(format!("https://{}.your-objectstorage.com", region)),
            S3Provider::MinIO => Some("http://localhost:9000".to_string()),
            S3Provider::CloudflareR2 => Some(format!("https://{}.r2.cloudflarestorage.com", region)),
            S3Provider::Wasabi => Some(format!("https://s3.{}.wasabisys.com", region)),
            S3Provider::Custom { endpoint, .. } => Some(endpoint.clone()),
        }
    }

    /// Get display name for the provider
    pub fn display_name(&self) -> &str {
        match self {
            S3Provider::Aws => "AWS S3",
            S3Provider::DigitalOcean => "DigitalOcean Spaces",
            S3Provider::Hetzner => "Hetzner Object Storage",
            S3Provider::MinIO => "MinIO",
            S3Provider::CloudflareR2 => "Cloudflare R2",
            S3Provider::Wasabi => "Wasabi",
            S3Provider::Custom { name, .. } => name,
        }
    }
}

/// Parked listers nobody asked about for this long are dropped.
const LISTING_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// A listing that has more entries than one page.
///
/// OpenDAL drains S3's own continuation tokens inside the `Lister`, so the
/// open lister is parked here and our token names it.
struct OpenListing {
    lister: Lister,
    carry: Option<Entry>,
    recursive: bool,
    prefix: String,
    parked_at: Instant,
}

/// S3 and S3-compatible storage backend using OpenDAL
pub struct S3Store {
    operator: Operator,
    bucket: String,
    region: String,
    provider: S3Provider,
    page_size: usize,
    open_listings: Mutex<HashMap<String, OpenListing>>,
    next_token: AtomicU64,
}

impl S3Store {
    /// Create a store with explicit credentials.
    ///
    /// Without credentials OpenDAL falls back to the standard AWS chain
    /// (environment, `~/.aws/credentials`, instance profile).
    pub fn new(
        bucket: &str,
        region: &str,
        provider: S3Provider,
        credentials: Option<(&str, &str)>,
        page_size: usize,
    ) -> Result<Self, StoreError> {
        let mut builder = S3::default().bucket(bucket).region(region);

        if let Some((access_key, secret_key)) = credentials {
            builder = builder.access_key_id(access_key).secret_access_key(secret_key);
        }

        // Set custom endpoint for S3-compatible providers
        if let Some(endpoint) = provider.endpoint(region) {
            builder = builder.endpoint(&endpoint);
        }

        let operator = Operator::new(builder)?.finish();

        Ok(Self {
            operator,
            bucket: bucket.to_string(),
            region: region.to_string(),
            provider,
            page_size: page_size.max(1),
            open_listings: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn provider(&self) -> &S3Provider {
        &self.provider
    }

    async fn open_listing(
        &self,
        prefix: &str,
        recursive: bool,
        start_after: Option<&str>,
    ) -> Result<OpenListing, StoreError> {
        // OpenDAL addresses the bucket root as "/"
        let path = if prefix.is_empty() { "/" } else { prefix };
        let mut request = self.operator.lister_with(path).recursive(recursive);
        if let Some(start_after) = start_after {
            request = request.start_after(start_after);
        }
        let lister = match request.await {
            Ok(lister) => lister,
            Err(err) if err.kind() == opendal::ErrorKind::NotFound => {
                return Err(StoreError::InvalidResponse(format!("prefix not found: {}", prefix)))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(OpenListing {
            lister,
            carry: None,
            recursive,
            prefix: prefix.to_string(),
            parked_at: Instant::now(),
        })
    }

    /// Park `listing` under a fresh token, dropping listers left idle too long.
    async fn park(&self, mut listing: OpenListing) -> String {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed).to_string();
        listing.parked_at = Instant::now();
        let mut open = self.open_listings.lock().await;
        let before = open.len();
        open.retain(|_, parked| parked.parked_at.elapsed() < LISTING_IDLE_TIMEOUT);
        if open.len() < before {
            tracing::debug!(dropped = before - open.len(), "dropped idle listings");
        }
        open.insert(token.clone(), listing);
        token
    }

    /// Number of listings waiting for their next page.
    pub async fn open_listing_count(&self) -> usize {
        self.open_listings.lock().await.len()
    }

    /// Sort one OpenDAL entry into objects or common prefixes.
    fn classify(listing: &OpenListing, entry: Entry, page: &mut ListPage) {
        let path = entry.path();
        let meta = entry.metadata();
        if meta.mode().is_dir() {
            if listing.recursive {
                // Only real marker objects show up as dirs in a flat listing
                page.entries.push(ObjectRecord::new(path, 0));
            } else if path != listing.prefix {
                page.common_prefixes.push(path.to_string());
            }
        } else {
            page.entries.push(ObjectRecord::new(path, meta.content_length()));
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<char>,
        start_after: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        if let Some(d) = delimiter {
            if d != '/' {
                return Err(StoreError::InvalidResponse(format!(
                    "unsupported delimiter {:?}",
                    d
                )));
            }
        }

        let mut listing = match continuation_token {
            Some(token) => self
                .open_listings
                .lock()
                .await
                .remove(token)
                .ok_or_else(|| StoreError::InvalidResponse(format!("unknown token {}", token)))?,
            None => match self.open_listing(prefix, delimiter.is_none(), start_after).await {
                Ok(listing) => listing,
                Err(StoreError::InvalidResponse(_)) => return Ok(ListPage::default()),
                Err(err) => return Err(err),
            },
        };

        let mut page = ListPage::default();
        let mut taken = 0;
        if let Some(entry) = listing.carry.take() {
            Self::classify(&listing, entry, &mut page);
            taken += 1;
        }
        while taken < self.page_size {
            match listing.lister.try_next().await? {
                Some(entry) => {
                    Self::classify(&listing, entry, &mut page);
                    taken += 1;
                }
                None => return Ok(page),
            }
        }

        // Page is full: look one entry ahead to learn whether more remain
        if let Some(entry) = listing.lister.try_next().await? {
            listing.carry = Some(entry);
            page.next_token = Some(self.park(listing).await);
            page.is_truncated = true;
        }
        Ok(page)
    }

    async fn delete_objects(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, DeleteOutcome>, StoreError> {
        match self.operator.delete_iter(keys.iter().cloned()).await {
            Ok(()) => Ok(keys
                .iter()
                .map(|key| (key.clone(), DeleteOutcome::Deleted))
                .collect()),
            Err(err) => {
                let err = StoreError::from(err);
                if err.is_retryable() {
                    return Err(err);
                }
                // The batch error does not say which keys were refused, ask one by one
                let mut outcomes = HashMap::with_capacity(keys.len());
                for key in keys {
                    let outcome = match self.operator.delete(key).await {
                        Ok(()) => DeleteOutcome::Deleted,
                        Err(e) => DeleteOutcome::Failed(e.to_string()),
                    };
                    outcomes.insert(key.clone(), outcome);
                }
                Ok(outcomes)
            }
        }
    }

    async fn release_token(&self, token: &str) {
        if self.open_listings.lock().await.remove(token).is_some() {
            tracing::debug!(token, "released open listing");
        }
    }

    fn display_name(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
