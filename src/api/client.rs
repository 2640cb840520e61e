//! HTTP implementation of the survey API.
//!
//! Authentication is a single `POST /rest/v2/authuser`; every other call is
//! a bearer-authenticated GET with the date range as `YYYY-MM-DD` strings.

use super::{ApiError, PageQuery, SurveyApi};
use crate::models::{value_to_string, DateRange, QuestionBlock, Survey};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

const AUTH_PATH: &str = "/rest/v2/authuser";
const SURVEYS_PATH: &str = "/rest/v2/relPesquisa";
const RESPONSES_PATH: &str = "/rest/v2/RelPesqAnalitico";
const STATS_PATH: &str = "/rest/v2/relAtEstatistico";

/// Authenticated API session.
#[derive(Debug, Clone)]
pub struct Session {
    pub base_url: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    login: &'a str,
    chave: &'a str,
}

/// Build the shared HTTP client.
pub fn build_http_client(timeout_seconds: u64) -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {}", e)))
}

/// Exchange login and key for a bearer token.
pub async fn authenticate(
    client: &reqwest::Client,
    base_url: &str,
    login: &str,
    key: &str,
) -> Result<Session, ApiError> {
    if login.is_empty() || key.is_empty() {
        return Err(ApiError::Auth("login and key are required".to_string()));
    }

    let base_url = base_url.trim_end_matches('/').to_string();
    let url = format!("{}{}", base_url, AUTH_PATH);
    info!("Authenticating as {} at {}", login, base_url);

    let response = client
        .post(&url)
        .json(&AuthRequest { login, chave: key })
        .send()
        .await
        .map_err(|e| ApiError::Auth(ApiError::from(e).to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Auth(format!("status {}: {}", status.as_u16(), body)));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| ApiError::Auth(format!("unreadable response: {}", e)))?;

    let token = parse_token(&body)?;
    Ok(Session { base_url, token })
}

/// Pull the bearer token out of an auth response.
fn parse_token(body: &Value) -> Result<String, ApiError> {
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
    let token = body
        .get("result")
        .and_then(|r| r.get("token"))
        .and_then(value_to_string);

    match (success, token) {
        (true, Some(token)) => Ok(token),
        _ => {
            let message = ["message", "msg", "error"]
                .iter()
                .find_map(|k| body.get(*k).and_then(value_to_string))
                .unwrap_or_else(|| "no token in response".to_string());
            Err(ApiError::Auth(message))
        }
    }
}

/// Survey API over HTTP with a bearer token.
pub struct HttpSurveyApi {
    client: reqwest::Client,
    session: Session,
}

impl HttpSurveyApi {
    pub fn new(client: reqwest::Client, session: Session) -> Self {
        Self { client, session }
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.session.base_url, path);
        debug!("GET {} {:?}", path, query);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.session.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SurveyApi for HttpSurveyApi {
    async fn list_surveys(
        &self,
        account_id: &str,
        range: &DateRange,
        page: usize,
        limit: usize,
    ) -> Result<Vec<Survey>, ApiError> {
        let body = self
            .get_json(
                SURVEYS_PATH,
                &[
                    ("data_inicial", range.start_param()),
                    ("data_final", range.end_param()),
                    ("id_conta", account_id.to_string()),
                    ("page", page.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        Ok(parse_surveys(body))
    }

    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<QuestionBlock>, ApiError> {
        let body = self
            .get_json(
                RESPONSES_PATH,
                &[
                    ("data_inicial", query.range.start_param()),
                    ("data_final", query.range.end_param()),
                    ("pesquisa", query.survey_id.clone()),
                    ("id_conta", query.account_id.clone()),
                    ("page", query.page.to_string()),
                    ("limit", query.limit.to_string()),
                ],
            )
            .await?;

        Ok(parse_blocks(body))
    }

    async fn list_services(
        &self,
        account_id: &str,
        range: &DateRange,
    ) -> Result<Vec<String>, ApiError> {
        let body = self
            .get_json(
                STATS_PATH,
                &[
                    ("data_inicial", range.start_param()),
                    ("data_final", range.end_param()),
                    ("id_conta", account_id.to_string()),
                    ("agrupador", "servico".to_string()),
                ],
            )
            .await?;

        Ok(parse_services(body))
    }
}

/// Row list of a response that is either a bare array or wraps one.
fn extract_rows(body: Value) -> Vec<Value> {
    match body {
        Value::Array(rows) => rows,
        Value::Object(mut map) => ["rows", "data", "result"]
            .iter()
            .find_map(|k| match map.remove(*k) {
                Some(Value::Array(rows)) => Some(rows),
                Some(nested @ Value::Object(_)) => Some(extract_rows(nested)),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn parse_surveys(body: Value) -> Vec<Survey> {
    extract_rows(body)
        .iter()
        .filter_map(|row| {
            let id = row.get("cod_pesquisa").and_then(value_to_string)?;
            let name = row
                .get("nom_pesquisa")
                .and_then(value_to_string)
                .unwrap_or_default();
            Some(Survey { id, name })
        })
        .collect()
}

fn parse_blocks(body: Value) -> Vec<QuestionBlock> {
    extract_rows(body)
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<QuestionBlock>(row) {
            Ok(block) => Some(block),
            Err(e) => {
                warn!("Skipping malformed question block: {}", e);
                None
            }
        })
        .collect()
}

fn parse_services(body: Value) -> Vec<String> {
    extract_rows(body)
        .iter()
        .filter_map(|row| row.get("agrupador").and_then(value_to_string))
        .collect()
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_token() {
        let ok = json!({ "success": true, "result": { "token": "abc123" } });
        assert_eq!(tokio_test::assert_ok!(parse_token(&ok)), "abc123");

        let denied = json!({ "success": false, "message": "Usuário inválido" });
        assert_eq!(
            parse_token(&denied),
            Err(ApiError::Auth("Usuário inválido".to_string()))
        );

        let no_token = json!({ "success": true, "result": {} });
        assert!(matches!(parse_token(&no_token), Err(ApiError::Auth(_))));
    }

    #[test]
    fn test_extract_rows_shapes() {
        assert_eq!(extract_rows(json!([1, 2])).len(), 2);
        assert_eq!(extract_rows(json!({ "rows": [1, 2, 3] })).len(), 3);
        assert_eq!(extract_rows(json!({ "result": { "rows": [1] } })).len(), 1);
        assert!(extract_rows(json!({ "unexpected": true })).is_empty());
        assert!(extract_rows(json!("oops")).is_empty());
    }

    #[test]
    fn test_parse_surveys_skips_rows_without_id() {
        let body = json!({ "rows": [
            { "cod_pesquisa": 10, "nom_pesquisa": "Pós-atendimento" },
            { "nom_pesquisa": "sem código" },
            { "cod_pesquisa": "11" }
        ]});

        let surveys = parse_surveys(body);
        assert_eq!(surveys.len(), 2);
        assert_eq!(surveys[0].id, "10");
        assert_eq!(surveys[0].name, "Pós-atendimento");
        assert_eq!(surveys[1].name, "");
    }

    #[test]
    fn test_parse_blocks_skips_malformed_blocks() {
        let body = json!([
            { "cod_pergunta": 1, "nom_pergunta": "Atendimento", "respostas": [
                { "num_protocolo": "123.0", "nom_agente": "ana", "nom_valor": "9" }
            ]},
            { "cod_pergunta": 2, "respostas": "not-a-list" },
            { "cod_pergunta": 3 }
        ]);

        let blocks = parse_blocks(body);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].respostas.len(), 1);
        assert!(blocks[1].respostas.is_empty());
    }

    #[test]
    fn test_parse_services() {
        let body = json!({ "rows": [
            { "agrupador": "Suporte", "total": 10 },
            { "agrupador": "" },
            { "total": 3 }
        ]});
        assert_eq!(parse_services(body), vec!["Suporte".to_string()]);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[tokio::test]
    async fn test_authenticate_requires_credentials() {
        let client = build_http_client(5).unwrap();
        let result = authenticate(&client, "http://127.0.0.1:9", "", "").await;
        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, ApiError::Auth(_)));
    }
}
