//! MediaWiki action API backend (feature `http`).
//!
//! Speaks the action API with the content-slot extension:
//! `query` + `prop=revisions&rvslots=*`, `editslot`, `edit`, `move`,
//! `delete`, `upload`, `ask`, `list=prefixsearch`,
//! `prop=imageinfo|fileusage`, `meta=tokens`.
//!
//! Accepts either a prebuilt `reqwest::Client` session or bot
//! `Credentials`; it never prompts and never reads the process
//! environment.

use crate::{
    ContentModel, Credentials, FileInfo, PageRecord, SlotPayload, SlotRecord, WikiError, WikiPort,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

pub struct HttpWiki {
    client: reqwest::Client,
    /// e.g. `https://wiki.example.org`
    base_url: Url,
    credentials: Option<Credentials>,
}

impl HttpWiki {
    pub fn new(base_url: Url) -> Result<Self, WikiError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| WikiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            credentials: None,
        })
    }

    /// Use a session built by the embedding application.
    pub fn with_session(base_url: Url, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn api_url(&self) -> Result<Url, WikiError> {
        self.base_url
            .join("/w/api.php")
            .map_err(|e| WikiError::Transport(e.to_string()))
    }

    /// Bot login: fetch a login token, then `action=login`.
    pub async fn login(&self) -> Result<(), WikiError> {
        let Some(credentials) = &self.credentials else {
            return Err(WikiError::AuthRequired);
        };
        let login_token = self.fetch_token("login").await?;
        let response = self
            .post(&[
                ("action", "login"),
                ("lgname", &credentials.username),
                ("lgpassword", &credentials.password),
                ("lgtoken", &login_token),
            ])
            .await?;
        let result = response
            .pointer("/login/result")
            .and_then(Value::as_str)
            .unwrap_or("Failed");
        if result != "Success" {
            return Err(WikiError::AuthFailed(result.to_string()));
        }
        debug!(user = %credentials.username, "logged in");
        Ok(())
    }

    async fn get(&self, params: &[(&str, &str)]) -> Result<Value, WikiError> {
        let mut query: Vec<(&str, &str)> =
            vec![("format", "json"), ("formatversion", "2")];
        query.extend_from_slice(params);
        let response = self
            .client
            .get(self.api_url()?)
            .query(&query)
            .send()
            .await
            .map_err(|e| WikiError::Transport(e.to_string()))?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| WikiError::Transport(e.to_string()))?;
        map_api_error(&value)?;
        Ok(value)
    }

    async fn post(&self, params: &[(&str, &str)]) -> Result<Value, WikiError> {
        let mut form: Vec<(&str, &str)> = vec![("format", "json"), ("formatversion", "2")];
        form.extend_from_slice(params);
        let response = self
            .client
            .post(self.api_url()?)
            .form(&form)
            .send()
            .await
            .map_err(|e| WikiError::Transport(e.to_string()))?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| WikiError::Transport(e.to_string()))?;
        map_api_error(&value)?;
        Ok(value)
    }

    async fn fetch_token(&self, kind: &str) -> Result<String, WikiError> {
        let response = self
            .get(&[("action", "query"), ("meta", "tokens"), ("type", kind)])
            .await?;
        response
            .pointer(&format!("/query/tokens/{kind}token"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| WikiError::Transport(format!("no {kind} token in response")))
    }
}

/// Translate MediaWiki API error codes into typed errors.
fn map_api_error(value: &Value) -> Result<(), WikiError> {
    let Some(code) = value.pointer("/error/code").and_then(Value::as_str) else {
        return Ok(());
    };
    let info = value
        .pointer("/error/info")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    Err(match code {
        "badtoken" => WikiError::BadToken,
        "editconflict" => WikiError::Conflict(info),
        "missingtitle" | "missingtitle-createonly" => WikiError::NotFound(info),
        "mustbeloggedin" | "readapidenied" => WikiError::AuthRequired,
        "permissiondenied" | "badlogin" => WikiError::AuthFailed(info),
        other => WikiError::Transport(format!("{other}: {info}")),
    })
}

fn decode_slot(slot: &Value) -> Option<SlotRecord> {
    let model = ContentModel::from_str_lossy(
        slot.get("contentmodel").and_then(Value::as_str).unwrap_or("wikitext"),
    );
    let text = slot.get("content").and_then(Value::as_str)?;
    let payload = match model {
        ContentModel::Json => match serde_json::from_str(text) {
            Ok(v) => SlotPayload::Json(v),
            Err(_) => SlotPayload::Text(text.to_string()),
        },
        _ => SlotPayload::Text(text.to_string()),
    };
    Some(SlotRecord {
        content_model: model,
        payload,
    })
}

fn decode_page(page: &Value, requested_title: &str) -> PageRecord {
    let title = page
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or(requested_title)
        .to_string();
    if page.get("missing").and_then(Value::as_bool).unwrap_or(false) {
        return PageRecord::missing(&title);
    }
    let revision = page.pointer("/revisions/0");
    let revid = revision
        .and_then(|r| r.get("revid"))
        .and_then(Value::as_u64);
    let mut slots = BTreeMap::new();
    if let Some(Value::Object(slot_map)) = revision.and_then(|r| r.get("slots")) {
        for (name, slot) in slot_map {
            if let Some(record) = decode_slot(slot) {
                slots.insert(name.clone(), record);
            }
        }
    }
    PageRecord {
        title,
        exists: true,
        revision: revid,
        slots,
    }
}

#[async_trait]
impl WikiPort for HttpWiki {
    async fn read_page(&self, title: &str) -> Result<PageRecord, WikiError> {
        let response = self
            .get(&[
                ("action", "query"),
                ("prop", "revisions"),
                ("rvprop", "content|ids"),
                ("rvslots", "*"),
                ("titles", title),
            ])
            .await?;
        let page = response
            .pointer("/query/pages/0")
            .ok_or_else(|| WikiError::Transport("no page in query response".to_string()))?;
        Ok(decode_page(page, title))
    }

    async fn read_pages(&self, titles: &[String]) -> Result<Vec<PageRecord>, WikiError> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }
        let joined = titles.join("|");
        let response = self
            .get(&[
                ("action", "query"),
                ("prop", "revisions"),
                ("rvprop", "content|ids"),
                ("rvslots", "*"),
                ("titles", &joined),
            ])
            .await?;
        let pages = response
            .pointer("/query/pages")
            .and_then(Value::as_array)
            .ok_or_else(|| WikiError::Transport("no pages in query response".to_string()))?;
        // The API does not guarantee input order; records carry titles.
        Ok(pages.iter().map(|p| decode_page(p, "")).collect())
    }

    async fn edit_main(
        &self,
        title: &str,
        wikitext: &str,
        comment: &str,
        token: &str,
    ) -> Result<(), WikiError> {
        self.post(&[
            ("action", "edit"),
            ("title", title),
            ("text", wikitext),
            ("summary", comment),
            ("token", token),
        ])
        .await
        .map(|_| ())
    }

    async fn edit_slot(
        &self,
        title: &str,
        slot: &str,
        text: &str,
        content_model: ContentModel,
        comment: &str,
        token: &str,
    ) -> Result<(), WikiError> {
        self.post(&[
            ("action", "editslot"),
            ("title", title),
            ("slot", slot),
            ("text", text),
            ("contentmodel", content_model.as_str()),
            ("summary", comment),
            ("token", token),
        ])
        .await
        .map(|_| ())
    }

    async fn move_page(
        &self,
        title: &str,
        new_title: &str,
        redirect: bool,
        comment: &str,
    ) -> Result<(), WikiError> {
        let token = self.fetch_token("csrf").await?;
        let mut params = vec![
            ("action", "move"),
            ("from", title),
            ("to", new_title),
            ("reason", comment),
            ("token", token.as_str()),
        ];
        if !redirect {
            params.push(("noredirect", "1"));
        }
        self.post(&params).await.map(|_| ())
    }

    async fn delete_page(&self, title: &str, comment: &str) -> Result<(), WikiError> {
        let token = self.fetch_token("csrf").await?;
        self.post(&[
            ("action", "delete"),
            ("title", title),
            ("reason", comment),
            ("token", &token),
        ])
        .await
        .map(|_| ())
    }

    async fn search_prefix(&self, text: &str, limit: usize) -> Result<Vec<String>, WikiError> {
        let limit = limit.to_string();
        let response = self
            .get(&[
                ("action", "query"),
                ("list", "prefixsearch"),
                ("pssearch", text),
                ("pslimit", &limit),
            ])
            .await?;
        Ok(response
            .pointer("/query/prefixsearch")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .filter_map(|h| h.get("title").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn search_semantic(&self, query: &str, limit: usize) -> Result<Vec<String>, WikiError> {
        let ask = format!("{query}|limit={limit}");
        let response = self.get(&[("action", "ask"), ("query", &ask)]).await?;
        let results = response
            .pointer("/query/results")
            .and_then(Value::as_object)
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        Ok(results)
    }

    async fn get_token(&self, kind: &str) -> Result<String, WikiError> {
        self.fetch_token(kind).await
    }

    async fn upload(&self, data: Vec<u8>, title: &str, comment: &str) -> Result<(), WikiError> {
        let token = self.fetch_token("csrf").await?;
        let filename = title.strip_prefix("File:").unwrap_or(title).to_string();
        let part = reqwest::multipart::Part::bytes(data).file_name(filename.clone());
        let form = reqwest::multipart::Form::new()
            .text("action", "upload")
            .text("format", "json")
            .text("formatversion", "2")
            .text("filename", filename)
            .text("comment", comment.to_string())
            .text("ignorewarnings", "1")
            .text("token", token)
            .part("file", part);
        let response = self
            .client
            .post(self.api_url()?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| WikiError::Transport(e.to_string()))?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| WikiError::Transport(e.to_string()))?;
        map_api_error(&value)
    }

    async fn file_info_and_usage(&self, title: &str) -> Result<FileInfo, WikiError> {
        let response = self
            .get(&[
                ("action", "query"),
                ("prop", "imageinfo|fileusage"),
                ("iiprop", "url|size"),
                ("titles", title),
            ])
            .await?;
        let page = response
            .pointer("/query/pages/0")
            .ok_or_else(|| WikiError::NotFound(title.to_string()))?;
        if page.get("missing").and_then(Value::as_bool).unwrap_or(false) {
            return Err(WikiError::NotFound(title.to_string()));
        }
        let info = page.pointer("/imageinfo/0");
        Ok(FileInfo {
            title: title.to_string(),
            url: info
                .and_then(|i| i.get("url"))
                .and_then(Value::as_str)
                .map(str::to_string),
            size: info.and_then(|i| i.get("size")).and_then(Value::as_u64),
            usage: page
                .get("fileusage")
                .and_then(Value::as_array)
                .map(|u| {
                    u.iter()
                        .filter_map(|p| p.get("title").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    fn site_url(&self) -> String {
        self.base_url.as_str().trim_end_matches('/').to_string()
    }
}
