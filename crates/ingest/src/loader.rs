use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

use crate::record::RawDocument;

/// Loads pre-extracted raw documents from disk. Extraction itself (PDF to
/// text plus metadata) happens upstream; this only reads its JSON output.
pub struct RawDocumentLoader;

impl RawDocumentLoader {
    pub async fn read_file(path: &Path) -> Result<RawDocument> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if extension != "json" {
            anyhow::bail!("unsupported raw document format: {:?}", path);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read raw document {:?}", path))?;

        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse raw document {:?}", path))
    }

    pub async fn read_directory(dir: &Path) -> Result<Vec<RawDocument>> {
        let mut documents = Vec::new();

        let mut entries = fs::read_dir(dir)
            .await
            .with_context(|| format!("failed to list raw documents in {:?}", dir))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                documents.push(Self::read_file(&path).await?);
            }
        }

        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_documents_parse_from_extractor_output() {
        let json = r#"{
            "id": "ruling_70.pdf-0",
            "text": "The council may not hire without a public tender.",
            "metadata": {
                "ruling_number": "70",
                "status": "ACTIVE",
                "status_date": "07/04/14",
                "section": "main_content",
                "chunk_index": "0"
            }
        }"#;

        let doc: RawDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.id, "ruling_70.pdf-0");
        assert_eq!(doc.metadata["status_date"], "07/04/14");
    }
}
