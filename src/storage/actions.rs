//! Action fact rows and their satellites.
//!
//! Each crawl action becomes one `fact_actions` row plus child rows for its
//! URL decomposition, post data, initiator stack, headers, security details,
//! and body. Dimension ids are resolved through the per-table id stores;
//! parent actions are referenced through a map from list index to inserted
//! row id, which always contains the parent because actions are processed in
//! order and parents precede children.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use log::debug;
use sqlx::{Sqlite, Transaction};
use url::Url;

use crate::domain;
use crate::models::{CrawlAction, Host, SecurityDetails, WireResponse};

use super::files::{FileStore, FileStoreError, StoredFile};
use super::id_store::IdStore;
use super::inserter::{RowInserter, SqlValue};

pub(crate) struct ActionStore {
    methods: IdStore,
    protocols: IdStore,
    initiators: IdStore,
    errors: IdStore,
    hosts: IdStore,

    url_schemes: IdStore,
    url_users: IdStore,
    url_hosts: IdStore,
    url_paths: IdStore,
    url_fragments: IdStore,
    url_queries: IdStore,

    header_keys: IdStore,
    header_keyvalues: IdStore,

    issuers: IdStore,
    key_exchanges: IdStore,
    ciphers: IdStore,
    san_lists: IdStore,

    mime_types: IdStore,

    files: FileStore,
}

impl ActionStore {
    pub(crate) fn new(files: FileStore) -> Self {
        Self {
            methods: IdStore::new("dim_methods", &["method"]),
            protocols: IdStore::new("dim_protocols", &["protocol"]),
            initiators: IdStore::new("dim_initiators", &["initiator"]),
            errors: IdStore::new("dim_errors", &["error"]),
            hosts: IdStore::new("dim_hosts", &["domain", "tld", "ipv4", "nameservers"]),
            url_schemes: IdStore::new("dim_url_schemes", &["scheme"]),
            url_users: IdStore::new("dim_url_users", &["user"]),
            url_hosts: IdStore::new("dim_url_hosts", &["host"]),
            url_paths: IdStore::new("dim_url_paths", &["path"]),
            url_fragments: IdStore::new("dim_url_fragments", &["fragment"]),
            url_queries: IdStore::new("dim_url_raw_queries", &["query"]),
            header_keys: IdStore::new("dim_header_keys", &["key"]),
            header_keyvalues: IdStore::new("dim_header_keyvalues", &["key_id", "value"]),
            issuers: IdStore::new("dim_issuers", &["issuer"]),
            key_exchanges: IdStore::new("dim_key_exchanges", &["key_exchange"]),
            ciphers: IdStore::new("dim_ciphers", &["cipher"]),
            san_lists: IdStore::new("dim_san_lists", &["list"]),
            mime_types: IdStore::new("dim_mime_types", &["mime_type"]),
            files,
        }
    }

    /// Persists the ordered action list for a session, returning the
    /// inserted row ids in the same order.
    pub(crate) async fn save(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        session_id: i64,
        actions: &[CrawlAction],
    ) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = Vec::with_capacity(actions.len());

        for action in actions {
            let parent_id = action.parent.and_then(|idx| ids.get(idx).copied());
            let action_id = self
                .insert_action(tx, session_id, parent_id, action)
                .await?;

            self.insert_url(tx, action_id, action).await?;

            if let Some(post_data) = &action.request.post_data {
                RowInserter::new("fact_post_data")
                    .column("action_id", action_id)
                    .column("data", post_data.clone())
                    .insert(tx)
                    .await?;
            }

            if let Some(stack) = &action.initiator.stack {
                RowInserter::new("fact_initiator_stack")
                    .column("action_id", action_id)
                    .column("col", stack.column)
                    .column("line", stack.line)
                    .column("func", stack.function.clone())
                    .insert(tx)
                    .await?;
            }

            self.insert_headers(tx, action_id, "fact_request_headers", &action.request.headers)
                .await?;

            if let Some(response) = &action.response {
                self.insert_headers(tx, action_id, "fact_response_headers", &response.headers)
                    .await?;

                if let Some(details) = &response.security_details {
                    self.insert_security_details(tx, action_id, details).await?;
                }
            }

            if let Some(body) = &action.body {
                self.insert_body(tx, action_id, action.response.as_ref(), &body.bytes, &body.sha256)
                    .await?;
            }

            ids.push(action_id);
        }

        Ok(ids)
    }

    async fn insert_action(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        session_id: i64,
        parent_id: Option<i64>,
        action: &CrawlAction,
    ) -> Result<i64> {
        let method_id = self
            .methods
            .get(tx, &[SqlValue::from(action.request.method.clone())])
            .await?;

        let initiator_id = self
            .initiators
            .get(tx, &[SqlValue::from(action.initiator.kind.as_str())])
            .await?;

        let protocol_id = match action.response.as_ref().and_then(|r| r.protocol.clone()) {
            Some(protocol) => Some(self.protocols.get(tx, &[SqlValue::from(protocol)]).await?),
            None => None,
        };

        let host_id = match &action.host {
            Some(host) => self.host_id(tx, host).await?,
            None => None,
        };

        let error_id = match &action.error {
            Some(error) => Some(self.errors.get(tx, &[SqlValue::from(error.clone())]).await?),
            None => None,
        };

        let row = RowInserter::new("fact_actions")
            .column("parent_id", parent_id)
            .column("session_id", session_id)
            .column("method_id", method_id)
            .column("protocol_id", protocol_id)
            .column("host_id", host_id)
            .column("initiator_id", initiator_id)
            .column("status_code", action.response.as_ref().map(|r| r.status))
            .column("error_id", error_id)
            .insert(tx)
            .await?;

        Ok(row)
    }

    /// Bare-IP hosts keep a NULL host dimension; the address itself is still
    /// visible through `fact_urls` and the stored host info of the page.
    async fn host_id(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        host: &Host,
    ) -> Result<Option<i64>> {
        if host.domain.is_empty() || domain::is_ip_literal(&host.domain) {
            return Ok(None);
        }

        let registrable =
            domain::registrable_domain(&host.domain).unwrap_or_else(|| host.domain.clone());
        let tld = domain::public_suffix(&host.domain)
            .unwrap_or_else(|| registrable.rsplit('.').next().unwrap_or_default().to_string());

        let id = self
            .hosts
            .get(
                tx,
                &[
                    SqlValue::from(registrable),
                    SqlValue::from(tld),
                    SqlValue::from(host.ipv4.clone()),
                    SqlValue::from(host.nameservers.join(",")),
                ],
            )
            .await?;

        Ok(Some(id))
    }

    async fn insert_url(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        action_id: i64,
        action: &CrawlAction,
    ) -> Result<()> {
        let url = match Url::parse(&action.request.url) {
            Ok(url) => url,
            Err(e) => {
                debug!("unparsable action url {}: {e}", action.request.url);
                return Ok(());
            }
        };

        let scheme_id = self
            .url_schemes
            .get(tx, &[SqlValue::from(url.scheme())])
            .await?;

        let user_id = match url.username() {
            "" => None,
            user => Some(self.url_users.get(tx, &[SqlValue::from(user)]).await?),
        };

        let mut host = url.host_str().unwrap_or_default().to_string();
        if let Some(port) = url.port() {
            host = format!("{host}:{port}");
        }
        let host_id = self.url_hosts.get(tx, &[SqlValue::from(host)]).await?;

        let path_id = self
            .url_paths
            .get(tx, &[SqlValue::from(url.path())])
            .await?;

        let fragment_id = match url.fragment() {
            Some(fragment) => Some(
                self.url_fragments
                    .get(tx, &[SqlValue::from(fragment)])
                    .await?,
            ),
            None => None,
        };

        let raw_query_id = match url.query() {
            Some(query) => Some(self.url_queries.get(tx, &[SqlValue::from(query)]).await?),
            None => None,
        };

        RowInserter::new("fact_urls")
            .column("action_id", action_id)
            .column("scheme_id", scheme_id)
            .column("user_id", user_id)
            .column("host_id", host_id)
            .column("path_id", path_id)
            .column("fragment_id", fragment_id)
            .column("raw_query_id", raw_query_id)
            .column("url", action.request.url.clone())
            .insert(tx)
            .await?;

        Ok(())
    }

    async fn insert_headers(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        action_id: i64,
        table: &'static str,
        headers: &BTreeMap<String, String>,
    ) -> Result<()> {
        for (key, value) in headers {
            let key_id = self
                .header_keys
                .get(tx, &[SqlValue::from(key.clone())])
                .await?;
            let keyvalue_id = self
                .header_keyvalues
                .get(tx, &[SqlValue::Int(key_id), SqlValue::from(value.clone())])
                .await?;

            RowInserter::new(table)
                .column("action_id", action_id)
                .column("header_keyvalue_id", keyvalue_id)
                .insert(tx)
                .await?;
        }

        Ok(())
    }

    async fn insert_security_details(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        action_id: i64,
        details: &SecurityDetails,
    ) -> Result<()> {
        let protocol_id = self
            .protocols
            .get(tx, &[SqlValue::from(details.protocol.clone())])
            .await?;
        let key_exchange_id = self
            .key_exchanges
            .get(tx, &[SqlValue::from(details.key_exchange.clone())])
            .await?;
        let issuer_id = self
            .issuers
            .get(tx, &[SqlValue::from(details.issuer.clone())])
            .await?;
        let cipher_id = self
            .ciphers
            .get(tx, &[SqlValue::from(details.cipher.clone())])
            .await?;
        let san_list_id = self
            .san_lists
            .get(tx, &[SqlValue::from(details.san_list_joined())])
            .await?;

        RowInserter::new("fact_security_details")
            .column("action_id", action_id)
            .column("protocol_id", protocol_id)
            .column("key_exchange_id", key_exchange_id)
            .column("issuer_id", issuer_id)
            .column("cipher_id", cipher_id)
            .column("san_list_id", san_list_id)
            .column("subject_name", details.subject_name.clone())
            .column("valid_from", details.valid_from)
            .column("valid_to", details.valid_to)
            .insert(tx)
            .await?;

        Ok(())
    }

    async fn insert_body(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        action_id: i64,
        response: Option<&WireResponse>,
        bytes: &[u8],
        sha256: &str,
    ) -> Result<()> {
        let browser_mime = response.map(|r| r.mime_type.clone()).unwrap_or_default();
        let browser_mime_id = self
            .mime_types
            .get(tx, &[SqlValue::from(browser_mime)])
            .await?;

        // A refused mime still records the body facts, just without a path.
        let stored: Option<StoredFile> = match self.files.store(bytes) {
            Ok(file) => Some(file),
            Err(FileStoreError::NotAllowedMime(file)) => Some(file),
            Err(FileStoreError::Io(e)) => {
                return Err(e).context("unable to write response body");
            }
        };

        let determined_mime_id = match &stored {
            Some(file) => Some(
                self.mime_types
                    .get(tx, &[SqlValue::from(file.mime_type.clone())])
                    .await?,
            ),
            None => None,
        };

        let (comp_size, path) = match &stored {
            Some(file) => (
                file.comp_size.map(|s| s as i64),
                file.path
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string()),
            ),
            None => (None, None),
        };

        RowInserter::new("fact_bodies")
            .column("action_id", action_id)
            .column("browser_mime_id", browser_mime_id)
            .column("determined_mime_id", determined_mime_id)
            .column("hash256", sha256)
            .column("org_size", bytes.len() as i64)
            .column("comp_size", comp_size)
            .column("path", path)
            .insert(tx)
            .await?;

        Ok(())
    }
}
