use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use scribe_core::error::Result;
use scribe_core::ContentState;

/// Writes the artifacts of a finished run under one output directory.
///
/// Files share a run timestamp: `brief_<ts>.json`, `research_<ts>.md`,
/// `content_<ts>.md` and `seo_<ts>.json`. Artifacts whose state field is
/// empty are skipped.
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write all artifacts stamped with the current time.
    pub async fn write(&self, state: &ContentState) -> Result<Vec<PathBuf>> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        self.write_stamped(state, &stamp).await
    }

    pub async fn write_stamped(&self, state: &ContentState, stamp: &str) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut written = Vec::new();
        if let Some(brief) = &state.brief {
            let body = serde_json::to_string_pretty(brief)?;
            written.push(self.put(&format!("brief_{}.json", stamp), &body).await?);
        }
        if let Some(findings) = &state.research_findings {
            written.push(self.put(&format!("research_{}.md", stamp), findings).await?);
        }
        if let Some(content) = &state.final_content {
            written.push(self.put(&format!("content_{}.md", stamp), content).await?);
        }
        if let Some(seo) = &state.seo_metadata {
            let body = serde_json::to_string_pretty(seo)?;
            written.push(self.put(&format!("seo_{}.json", stamp), &body).await?);
        }

        info!(dir = %self.dir.display(), files = written.len(), "Artifacts saved");
        Ok(written)
    }

    async fn put(&self, name: &str, body: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(body.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %path.display(), bytes = body.len(), "Artifact written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::types::{Brief, ContentRequest, SeoMetadata};

    #[tokio::test]
    async fn test_writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("out"));

        let mut state = ContentState::new(ContentRequest::new("x"));
        state.brief = Some(Brief::fallback());
        state.research_findings = Some("findings".into());
        state.final_content = Some("# Final".into());
        state.seo_metadata = Some(SeoMetadata {
            title: "T".into(),
            meta_description: "D".into(),
            keywords_used: vec!["k".into()],
            confidence: 0.9,
            url_slug: "t".into(),
        });

        let files = writer.write_stamped(&state, "20260101_120000").await.unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "brief_20260101_120000.json",
                "research_20260101_120000.md",
                "content_20260101_120000.md",
                "seo_20260101_120000.json",
            ]
        );

        let content = std::fs::read_to_string(&files[2]).unwrap();
        assert_eq!(content, "# Final");
        let brief: Brief = serde_json::from_str(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
        assert_eq!(brief, Brief::fallback());
    }

    #[tokio::test]
    async fn test_skips_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let state = ContentState::new(ContentRequest::new("x"));

        let files = writer.write(&state).await.unwrap();
        assert!(files.is_empty());
    }
}
