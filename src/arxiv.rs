//! arXiv API client: paper search, metadata lookup, and PDF download.
//!
//! The arXiv export API returns Atom XML; [`parse_feed`] pulls the entries
//! out with a streaming `quick-xml` reader. Search is preview-only (no side
//! effects); downloading feeds the ingestion pipeline's `downloading` state.

use std::time::Duration;

use quick_xml::events::Event;

use crate::config::ArxivConfig;
use crate::error::{Error, Result};
use crate::models::ArxivPaper;

#[derive(Clone)]
pub struct ArxivClient {
    http: reqwest::Client,
    api_url: String,
    max_results: usize,
}

impl ArxivClient {
    pub fn new(config: &ArxivConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            max_results: config.max_results,
        })
    }

    /// Searches arXiv by free-text query. `max_results` is capped by the
    /// configured server limit.
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<ArxivPaper>> {
        let capped = max_results.clamp(1, self.max_results);
        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("search_query", format!("all:{}", query)),
                ("start", "0".to_string()),
                ("max_results", capped.to_string()),
                ("sortBy", "relevance".to_string()),
                ("sortOrder", "descending".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "arXiv API returned {}",
                response.status()
            )));
        }

        parse_feed(&response.text().await?)
    }

    /// Looks up a single paper by id (new `1706.03762` or old `cs/0703001`
    /// format, optionally prefixed with `arXiv:` or an abs URL).
    pub async fn fetch_metadata(&self, arxiv_id: &str) -> Result<ArxivPaper> {
        let id = normalize_arxiv_id(arxiv_id);
        let response = self
            .http
            .get(&self.api_url)
            .query(&[("id_list", id.as_str()), ("max_results", "1")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "arXiv API returned {}",
                response.status()
            )));
        }

        parse_feed(&response.text().await?)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Fetch(format!("no arXiv entry for '{}'", id)))
    }

    pub async fn download_pdf(&self, paper: &ArxivPaper) -> Result<Vec<u8>> {
        let response = self.http.get(&paper.pdf_url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "arXiv PDF download returned {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::Fetch(format!(
                "arXiv PDF download for '{}' was empty",
                paper.arxiv_id
            )));
        }
        Ok(bytes.to_vec())
    }
}

/// Strips the decorations people paste along with an arXiv id.
pub fn normalize_arxiv_id(raw: &str) -> String {
    let mut id = raw.trim();
    for prefix in [
        "https://arxiv.org/abs/",
        "http://arxiv.org/abs/",
        "https://arxiv.org/pdf/",
        "http://arxiv.org/pdf/",
    ] {
        if let Some(rest) = id.strip_prefix(prefix) {
            id = rest;
        }
    }
    for prefix in ["arXiv:", "arxiv:", "ARXIV:"] {
        if let Some(rest) = id.strip_prefix(prefix) {
            id = rest;
        }
    }
    id.trim().to_string()
}

/// Element currently accumulating text inside an `<entry>`.
enum Field {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    current_author: String,
    pdf_url: Option<String>,
}

impl EntryBuilder {
    fn finish(self) -> Option<ArxivPaper> {
        // The entry <id> is a URL like http://arxiv.org/abs/1706.03762v5
        let arxiv_id = match self.id.rsplit("/abs/").next() {
            Some(short) if !short.is_empty() && short != self.id => short.to_string(),
            _ => collapse_ws(&self.id),
        };
        if arxiv_id.is_empty() {
            return None;
        }
        let pdf_url = self
            .pdf_url
            .unwrap_or_else(|| format!("https://arxiv.org/pdf/{}", arxiv_id));
        // Timestamps come as 2017-06-12T17:57:34Z; keep the date part.
        let published = self.published.trim().get(..10).map(str::to_string);
        Some(ArxivPaper {
            arxiv_id,
            title: collapse_ws(&self.title),
            authors: self.authors,
            summary: collapse_ws(&self.summary),
            published_at: published,
            pdf_url,
        })
    }
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses an arXiv Atom feed into papers. Unknown elements are skipped;
/// a malformed document is a fetch error, not a panic.
pub fn parse_feed(xml: &str) -> Result<Vec<ArxivPaper>> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut papers = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut field: Option<Field> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"entry" => entry = Some(EntryBuilder::default()),
                    b"id" if entry.is_some() => field = Some(Field::Id),
                    b"title" if entry.is_some() => field = Some(Field::Title),
                    b"summary" if entry.is_some() => field = Some(Field::Summary),
                    b"published" if entry.is_some() => field = Some(Field::Published),
                    b"name" if entry.is_some() => field = Some(Field::AuthorName),
                    b"link" => {
                        if let Some(ref mut builder) = entry {
                            read_pdf_link(&e, builder);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"link" {
                    if let Some(ref mut builder) = entry {
                        read_pdf_link(&e, builder);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(builder), Some(f)) = (entry.as_mut(), field.as_ref()) {
                    let text = t.unescape().unwrap_or_default();
                    let target = match f {
                        Field::Id => &mut builder.id,
                        Field::Title => &mut builder.title,
                        Field::Summary => &mut builder.summary,
                        Field::Published => &mut builder.published,
                        Field::AuthorName => &mut builder.current_author,
                    };
                    if !target.is_empty() {
                        target.push(' ');
                    }
                    target.push_str(text.as_ref());
                }
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"entry" => {
                        if let Some(builder) = entry.take() {
                            if let Some(paper) = builder.finish() {
                                papers.push(paper);
                            }
                        }
                    }
                    b"name" => {
                        if let Some(ref mut builder) = entry {
                            let author = collapse_ws(&builder.current_author);
                            if !author.is_empty() {
                                builder.authors.push(author);
                            }
                            builder.current_author.clear();
                        }
                        field = None;
                    }
                    b"id" | b"title" | b"summary" | b"published" => field = None,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Fetch(format!("invalid arXiv feed: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(papers)
}

fn read_pdf_link(e: &quick_xml::events::BytesStart<'_>, builder: &mut EntryBuilder) {
    let mut href = None;
    let mut is_pdf = false;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"href" => {
                if let Ok(v) = attr.unescape_value() {
                    href = Some(v.into_owned());
                }
            }
            b"title" | b"type" => {
                if let Ok(v) = attr.unescape_value() {
                    if v == "pdf" || v == "application/pdf" {
                        is_pdf = true;
                    }
                }
            }
            _ => {}
        }
    }
    if is_pdf {
        if let Some(url) = href {
            builder.pdf_url = Some(url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="html">ArXiv Query: search_query=all:attention</title>
  <id>http://arxiv.org/api/x1PKDEttGsiZYZ1WWeCVGak9nTM</id>
  <entry>
    <id>http://arxiv.org/abs/1706.03762v5</id>
    <published>2017-06-12T17:57:34Z</published>
    <title>Attention Is All
      You Need</title>
    <summary>The dominant sequence transduction models are based on complex
      recurrent or convolutional neural networks.</summary>
    <author><name>Ashish Vaswani</name></author>
    <author><name>Noam Shazeer</name></author>
    <link href="http://arxiv.org/abs/1706.03762v5" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/1706.03762v5" rel="related" type="application/pdf"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/1810.04805v2</id>
    <published>2018-10-11T00:50:01Z</published>
    <title>BERT: Pre-training of Deep Bidirectional Transformers</title>
    <summary>We introduce a new language representation model called BERT.</summary>
    <author><name>Jacob Devlin</name></author>
  </entry>
</feed>"#;

    #[test]
    fn parses_entries_with_metadata() {
        let papers = parse_feed(FEED).unwrap();
        assert_eq!(papers.len(), 2);

        let first = &papers[0];
        assert_eq!(first.arxiv_id, "1706.03762v5");
        assert_eq!(first.title, "Attention Is All You Need");
        assert_eq!(first.authors, vec!["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(first.published_at.as_deref(), Some("2017-06-12"));
        assert_eq!(first.pdf_url, "http://arxiv.org/pdf/1706.03762v5");
        assert!(first.summary.starts_with("The dominant sequence"));
    }

    #[test]
    fn missing_pdf_link_falls_back_to_derived_url() {
        let papers = parse_feed(FEED).unwrap();
        assert_eq!(papers[1].pdf_url, "https://arxiv.org/pdf/1810.04805v2");
    }

    #[test]
    fn feed_without_entries_is_empty() {
        let xml = r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom"><id>http://arxiv.org/api/q</id></feed>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn truncated_feed_yields_no_partial_papers() {
        // An entry that never closes must not surface as a paper.
        if let Ok(papers) = parse_feed("<feed><entry><id>http://arxiv.org/abs/1234.5678") {
            assert!(papers.is_empty());
        }
    }

    #[test]
    fn id_normalization() {
        assert_eq!(normalize_arxiv_id(" 1706.03762 "), "1706.03762");
        assert_eq!(normalize_arxiv_id("arXiv:1706.03762"), "1706.03762");
        assert_eq!(
            normalize_arxiv_id("https://arxiv.org/abs/cs/0703001"),
            "cs/0703001"
        );
        assert_eq!(
            normalize_arxiv_id("http://arxiv.org/pdf/1706.03762v5"),
            "1706.03762v5"
        );
    }
}
