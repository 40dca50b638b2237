use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::config::ReplicationConfig;
use crate::error::{ReplError, ReplResult};
use crate::remote::{RemoteError, RemoteResult, RemoteStore};

/// S3-backed remote store.
///
/// The worker is a plain thread, so each call drives the async SDK to
/// completion on a dedicated current-thread runtime.
pub struct S3RemoteStore {
    runtime: tokio::runtime::Runtime,
    client: Client,
    bucket: String,
}

impl S3RemoteStore {
    /// Connect using the ambient AWS credential chain and the configured
    /// bucket/region.
    pub fn connect(config: &ReplicationConfig) -> ReplResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ReplError::Io)?;

        let region = Region::new(config.region().to_string());
        let shared = runtime.block_on(
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(region)
                .load(),
        );

        Ok(Self {
            runtime,
            client: Client::new(&shared),
            bucket: config.bucket.clone(),
        })
    }
}

impl RemoteStore for S3RemoteStore {
    fn put_object(&self, key: &str, body: Vec<u8>) -> RemoteResult<()> {
        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(ByteStream::from(body))
                    .send(),
            )
            .map_err(|e| RemoteError(e.to_string()))?;
        Ok(())
    }

    fn get_object(&self, key: &str) -> RemoteResult<Option<Vec<u8>>> {
        let result = self.runtime.block_on(
            self.client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send(),
        );
        match result {
            Ok(out) => {
                let data = self
                    .runtime
                    .block_on(out.body.collect())
                    .map_err(|e| RemoteError(e.to_string()))?;
                Ok(Some(data.into_bytes().to_vec()))
            }
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(RemoteError(err.to_string()))
                }
            }
        }
    }

    fn exists(&self, key: &str) -> RemoteResult<bool> {
        let result = self.runtime.block_on(
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send(),
        );
        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(RemoteError(err.to_string()))
                }
            }
        }
    }

    fn list(&self) -> RemoteResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(token) = &continuation {
                req = req.continuation_token(token);
            }
            let page = self
                .runtime
                .block_on(req.send())
                .map_err(|e| RemoteError(e.to_string()))?;

            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }
}

impl std::fmt::Debug for S3RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3RemoteStore")
            .field("bucket", &self.bucket)
            .finish()
    }
}
