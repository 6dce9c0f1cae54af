//! Literature search backend (PubMed E-utilities)
//!
//! Two-step fetch: `esearch.fcgi` for PMIDs and the total hit count, then
//! `efetch.fcgi` for titles and abstracts. Three failure modes are kept
//! distinct because the workflow reacts differently to each: no results,
//! result set too broad (count over 10,000), and transport/parse trouble.

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;

use draftflow_common::config::PubMedConfig;
use draftflow_common::{PaperCandidate, Result, WorkflowError};

const TOO_BROAD_THRESHOLD: u64 = 10_000;

/// Literature search contract.
#[async_trait]
pub trait LiteratureSearch: Send + Sync {
    /// Run the query and return up to `retmax` candidates with abstracts.
    async fn fetch_top_abstracts(&self, query: &str, retmax: usize)
        -> Result<Vec<PaperCandidate>>;
}

/// PubMed E-utilities implementation.
pub struct PubMedClient {
    client: reqwest::Client,
    config: PubMedConfig,
}

impl PubMedClient {
    pub fn new(config: PubMedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(WorkflowError::Http)?;
        Ok(Self { client, config })
    }

    async fn get_xml(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String> {
        let url = format!("{}/{}", self.config.base_url, endpoint);
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("tool", &self.config.tool));
        query.push(("email", &self.config.email));
        if let Some(key) = self.config.api_key.as_deref() {
            query.push(("api_key", key));
        }

        let resp = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| WorkflowError::SearchTransport {
                message: format!("request failed: {e}"),
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| WorkflowError::SearchTransport {
            message: format!("body read failed: {e}"),
        })?;
        if status != reqwest::StatusCode::OK {
            return Err(WorkflowError::SearchTransport {
                message: format!("HTTP {status}: {body}"),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl LiteratureSearch for PubMedClient {
    async fn fetch_top_abstracts(
        &self,
        query: &str,
        retmax: usize,
    ) -> Result<Vec<PaperCandidate>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(WorkflowError::SearchTransport {
                message: "empty query".into(),
            });
        }

        let retmax_str = retmax.to_string();
        let xml = self
            .get_xml(
                "esearch.fcgi",
                &[
                    ("db", "pubmed"),
                    ("term", query),
                    ("retmode", "xml"),
                    ("retmax", &retmax_str),
                ],
            )
            .await?;
        let (ids, count) = parse_esearch(&xml)?;

        if let Some(count) = count {
            if count > TOO_BROAD_THRESHOLD {
                return Err(WorkflowError::SearchTooBroad { count });
            }
        }
        if ids.is_empty() {
            return Err(WorkflowError::SearchNoResults);
        }

        let id_param = ids.join(",");
        let xml = self
            .get_xml(
                "efetch.fcgi",
                &[("db", "pubmed"), ("id", &id_param), ("retmode", "xml")],
            )
            .await?;
        let mut papers = parse_efetch(&xml)?;

        if papers.is_empty() {
            return Err(WorkflowError::SearchNoResults);
        }
        papers.truncate(retmax);
        Ok(papers)
    }
}

fn xml_error(e: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::SearchTransport {
        message: format!("xml parse error: {e}"),
    }
}

/// Parse an esearch response into (pmids, total hit count).
///
/// `Count` is taken only as a direct child of the root; the element name also
/// appears inside `TranslationStack`.
pub fn parse_esearch(xml: &str) -> Result<(Vec<String>, Option<u64>)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut ids: Vec<String> = Vec::new();
    let mut count: Option<u64> = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(xml_error)?.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                let names: Vec<&str> = path.iter().map(String::as_str).collect();
                match names.as_slice() {
                    [_root, "Count"] => {
                        if count.is_none() {
                            count = text.parse::<u64>().ok();
                        }
                    }
                    [_root, "IdList", "Id"] => ids.push(text),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok((ids, count))
}

/// Parse an efetch response into candidates. Articles without a PMID are
/// skipped; abstract sections are joined with newlines.
pub fn parse_efetch(xml: &str) -> Result<Vec<PaperCandidate>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut papers: Vec<PaperCandidate> = Vec::new();

    let mut pmid = String::new();
    let mut title = String::new();
    let mut abstract_parts: Vec<String> = Vec::new();

    // Element cursors. PMID counts only directly under MedlineCitation
    // (CommentsCorrections entries also carry PMID elements).
    let mut in_article_el = false;
    let mut in_pmid = false;
    let mut in_title = false;
    let mut in_abstract = false;
    let mut in_abstract_text = false;
    let mut current_part = String::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => match e.name().as_ref() {
                b"PubmedArticle" => {
                    pmid.clear();
                    title.clear();
                    abstract_parts.clear();
                }
                b"Article" => in_article_el = true,
                b"PMID" if !in_article_el && pmid.is_empty() => in_pmid = true,
                b"ArticleTitle" if in_article_el => in_title = true,
                b"Abstract" if in_article_el => in_abstract = true,
                b"AbstractText" if in_abstract => {
                    in_abstract_text = true;
                    current_part.clear();
                }
                _ => {}
            },
            Event::End(e) => match e.name().as_ref() {
                b"PubmedArticle" => {
                    if !pmid.is_empty() {
                        let url = format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/");
                        papers.push(PaperCandidate {
                            pmid: pmid.clone(),
                            title: title.trim().to_string(),
                            abstract_text: abstract_parts.join("\n").trim().to_string(),
                            url,
                        });
                    }
                }
                b"Article" => in_article_el = false,
                b"PMID" => in_pmid = false,
                b"ArticleTitle" => in_title = false,
                b"Abstract" => in_abstract = false,
                b"AbstractText" => {
                    in_abstract_text = false;
                    let part = current_part.trim().to_string();
                    if !part.is_empty() {
                        abstract_parts.push(part);
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                let text = t.unescape().map_err(xml_error)?;
                if in_pmid && pmid.is_empty() {
                    pmid = text.trim().to_string();
                } else if in_title {
                    title.push_str(&text);
                } else if in_abstract_text {
                    current_part.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(papers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ESEARCH_XML: &str = r#"<?xml version="1.0"?>
<eSearchResult>
  <Count>42</Count>
  <RetMax>3</RetMax>
  <IdList>
    <Id>11111111</Id>
    <Id>22222222</Id>
    <Id>33333333</Id>
  </IdList>
  <TranslationStack>
    <TermSet><Term>hypertension</Term><Count>999999</Count></TermSet>
  </TranslationStack>
</eSearchResult>"#;

    const EFETCH_XML: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">11111111</PMID>
      <Article>
        <ArticleTitle>Blood pressure control in adults.</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">First part.</AbstractText>
          <AbstractText Label="RESULTS">Second part.</AbstractText>
        </Abstract>
      </Article>
      <CommentsCorrectionsList>
        <CommentsCorrections><PMID Version="1">99999999</PMID></CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">22222222</PMID>
      <Article>
        <ArticleTitle>No abstract here.</ArticleTitle>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_esearch_ids_and_count() {
        let (ids, count) = parse_esearch(ESEARCH_XML).unwrap();
        assert_eq!(ids, vec!["11111111", "22222222", "33333333"]);
        assert_eq!(count, Some(42));
    }

    #[test]
    fn test_parse_esearch_ignores_translation_stack_count() {
        let (_, count) = parse_esearch(ESEARCH_XML).unwrap();
        assert_ne!(count, Some(999_999));
    }

    #[test]
    fn test_parse_esearch_empty_id_list() {
        let xml = "<eSearchResult><Count>0</Count><IdList></IdList></eSearchResult>";
        let (ids, count) = parse_esearch(xml).unwrap();
        assert!(ids.is_empty());
        assert_eq!(count, Some(0));
    }

    #[test]
    fn test_parse_efetch_candidates() {
        let papers = parse_efetch(EFETCH_XML).unwrap();
        assert_eq!(papers.len(), 2);

        assert_eq!(papers[0].pmid, "11111111");
        assert_eq!(papers[0].title, "Blood pressure control in adults.");
        assert_eq!(papers[0].abstract_text, "First part.\nSecond part.");
        assert_eq!(papers[0].url, "https://pubmed.ncbi.nlm.nih.gov/11111111/");

        assert_eq!(papers[1].pmid, "22222222");
        assert_eq!(papers[1].abstract_text, "");
    }

    #[test]
    fn test_parse_efetch_skips_articles_without_pmid() {
        let xml = r#"<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <Article><ArticleTitle>Orphan.</ArticleTitle></Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;
        let papers = parse_efetch(xml).unwrap();
        assert!(papers.is_empty());
    }
}
