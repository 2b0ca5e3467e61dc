//! Document and knowledge-base retrieval tools.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use pensionflow::error::Result;
use pensionflow::tools::{Tool, ToolInput};
use pensionflow::vector_stores::{similarity_from_distance, QueryResult};

use crate::scope::resolve_scope;

use super::{effective_caller_id, effective_query, not_authenticated, ToolDeps};

/// Stable status tokens a UI keys off.
pub const SEARCH_TYPE_PDF: &str = "PDF_DOCUMENT_SEARCH";
pub const PDF_STATUS_FOUND: &str = "PDFS_FOUND_AND_SEARCHED";
pub const PDF_STATUS_NONE: &str = "NO_PDFS_FOUND";
pub const PDF_STATUS_ERROR: &str = "ERROR_OCCURRED";

/// Marker the ingestion pipeline writes into chunks it could not extract
/// text from (image-only pages).
pub const OCR_PLACEHOLDER_MARKER: &str = "text extraction requires OCR";

const OCR_EXPLANATION: &str = "This part of your document appears to be a scanned \
image without a text layer, so its contents could not be read. Re-upload a \
text-based PDF to search this section.";

/// The name of a user's private document collection.
fn user_docs_collection(user_id: i64) -> String {
    format!("user_{user_id}_docs")
}

/// Shared knowledge-base collection name.
const KNOWLEDGE_COLLECTION: &str = "pension_knowledge";

fn format_results(result: &QueryResult, source_collection: &str) -> Vec<Value> {
    result
        .documents
        .iter()
        .zip(&result.metadatas)
        .zip(&result.distances)
        .enumerate()
        .map(|(index, ((text, metadata), distance))| {
            let content = if text.contains(OCR_PLACEHOLDER_MARKER) {
                OCR_EXPLANATION.to_string()
            } else {
                text.clone()
            };
            json!({
                "result": index + 1,
                "content": content,
                "source": metadata.get("source").cloned().unwrap_or(json!("Unknown")),
                "chunk_index": metadata.get("chunk_index").cloned().unwrap_or(Value::Null),
                "relevance_score": similarity_from_distance(*distance),
                "source_collection": source_collection,
            })
        })
        .collect()
}

fn no_documents_response() -> Value {
    json!({
        "found": false,
        "message": "No relevant information found in your uploaded documents.",
        "suggestions": [
            "Try rephrasing your question",
            "Use more specific terms",
            "Check that a document has been uploaded for your account"
        ],
        "search_type": SEARCH_TYPE_PDF,
        "pdf_status": PDF_STATUS_NONE,
    })
}

fn retrieval_error(err: impl std::fmt::Display) -> Value {
    json!({
        "error": format!("Error searching documents: {err}"),
        "search_type": SEARCH_TYPE_PDF,
        "pdf_status": PDF_STATUS_ERROR,
    })
}

/// `query_knowledge_base` - searches the caller's uploaded documents.
pub struct QueryKnowledgeBaseTool {
    deps: ToolDeps,
}

impl QueryKnowledgeBaseTool {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }

    async fn execute(&self, input: &ToolInput) -> Value {
        let Some(caller_id) = effective_caller_id(input) else {
            return not_authenticated();
        };
        let query = effective_query(input);
        if query.is_empty() {
            return json!({"error": "A search query is required"});
        }

        let scope = match resolve_scope(self.deps.store.as_ref(), caller_id, &query).await {
            Ok(scope) => scope,
            Err(err) => return retrieval_error(err),
        };
        debug!(target_id = scope.target_id, %query, "searching uploaded documents");

        let collection = match self
            .deps
            .vectors
            .collection(&user_docs_collection(scope.target_id))
        {
            Ok(collection) => collection,
            Err(err) => return retrieval_error(err),
        };

        let result = match collection.query(&query, 3, None).await {
            Ok(result) => result,
            Err(err) => return retrieval_error(err),
        };
        if result.is_empty() {
            return no_documents_response();
        }

        let formatted = format_results(&result, &user_docs_collection(scope.target_id));
        json!({
            "found": true,
            "query": query,
            "user_id": scope.target_id,
            "results": formatted,
            "total_results": formatted.len(),
            "search_type": SEARCH_TYPE_PDF,
            "pdf_status": PDF_STATUS_FOUND,
        })
    }
}

#[async_trait]
impl Tool for QueryKnowledgeBaseTool {
    fn name(&self) -> &str {
        "query_knowledge_base"
    }

    fn description(&self) -> &str {
        "Searches the user's uploaded PDF documents (pension plans, policies) \
         for passages relevant to the query. Use for any question about an \
         uploaded document."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query."},
                "user_id": {"type": "integer", "description": "Falls back to the authenticated caller."}
            },
            "required": ["query"]
        })
    }

    async fn call(&self, input: ToolInput) -> Result<String> {
        Ok(self.execute(&input).await.to_string())
    }
}

/// `analyze_uploaded_document` - a deeper read over the same collection.
pub struct AnalyzeUploadedDocumentTool {
    deps: ToolDeps,
}

impl AnalyzeUploadedDocumentTool {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }

    async fn execute(&self, input: &ToolInput) -> Value {
        let Some(caller_id) = effective_caller_id(input) else {
            return not_authenticated();
        };
        let query = effective_query(input);
        if query.is_empty() {
            return json!({"error": "A search query is required"});
        }

        let scope = match resolve_scope(self.deps.store.as_ref(), caller_id, &query).await {
            Ok(scope) => scope,
            Err(err) => return retrieval_error(err),
        };

        let collection = match self
            .deps
            .vectors
            .collection(&user_docs_collection(scope.target_id))
        {
            Ok(collection) => collection,
            Err(err) => return retrieval_error(err),
        };

        let result = match collection.query(&query, 5, None).await {
            Ok(result) => result,
            Err(err) => return retrieval_error(err),
        };
        if result.is_empty() {
            return no_documents_response();
        }

        let formatted = format_results(&result, &user_docs_collection(scope.target_id));
        json!({
            "found": true,
            "query": query,
            "user_id": scope.target_id,
            "results": formatted,
            "total_results": formatted.len(),
            "analysis_type": "DOCUMENT_ANALYSIS",
            "search_type": SEARCH_TYPE_PDF,
            "pdf_status": PDF_STATUS_FOUND,
        })
    }
}

#[async_trait]
impl Tool for AnalyzeUploadedDocumentTool {
    fn name(&self) -> &str {
        "analyze_uploaded_document"
    }

    fn description(&self) -> &str {
        "Pulls a wider set of passages from the user's uploaded documents for \
         summarization or cross-section analysis."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for in the document."},
                "user_id": {"type": "integer", "description": "Falls back to the authenticated caller."}
            },
            "required": ["query"]
        })
    }

    async fn call(&self, input: ToolInput) -> Result<String> {
        Ok(self.execute(&input).await.to_string())
    }
}

/// `knowledge_base_search` - union of the shared knowledge base and the
/// caller's documents, ranked by similarity.
pub struct KnowledgeBaseSearchTool {
    deps: ToolDeps,
}

impl KnowledgeBaseSearchTool {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }

    async fn execute(&self, input: &ToolInput) -> Value {
        let Some(caller_id) = effective_caller_id(input) else {
            return not_authenticated();
        };
        let query = effective_query(input);
        if query.is_empty() {
            return json!({"error": "A search query is required"});
        }

        let scope = match resolve_scope(self.deps.store.as_ref(), caller_id, &query).await {
            Ok(scope) => scope,
            Err(err) => return json!({"error": format!("Error searching knowledge base: {err}")}),
        };

        let mut combined: Vec<Value> = Vec::new();
        // Top-2 shared chunks, then top-3 from the caller's documents.
        match self.deps.vectors.collection(KNOWLEDGE_COLLECTION) {
            Ok(shared) => match shared.query(&query, 2, None).await {
                Ok(result) => combined.extend(format_results(&result, KNOWLEDGE_COLLECTION)),
                Err(err) => {
                    return json!({"error": format!("Error searching knowledge base: {err}")})
                }
            },
            Err(err) => return json!({"error": format!("Error searching knowledge base: {err}")}),
        }
        let docs_name = user_docs_collection(scope.target_id);
        if let Ok(personal) = self.deps.vectors.collection(&docs_name) {
            if let Ok(result) = personal.query(&query, 3, None).await {
                combined.extend(format_results(&result, &docs_name));
            }
        }

        if combined.is_empty() {
            return json!({
                "found": false,
                "message": "No relevant information found in the knowledge base.",
                "suggestions": [
                    "Try rephrasing your question",
                    "Use more specific terms",
                    "Check if your question is related to pensions, retirement, or financial planning"
                ],
            });
        }

        // Rank the union by similarity and renumber.
        combined.sort_by(|a, b| {
            let score = |v: &Value| v["relevance_score"].as_f64().unwrap_or(0.0);
            score(b)
                .partial_cmp(&score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (index, entry) in combined.iter_mut().enumerate() {
            if let Some(map) = entry.as_object_mut() {
                map.insert("result".to_string(), json!(index + 1));
            }
        }

        json!({
            "found": true,
            "query": query,
            "results": combined,
            "total_results": combined.len(),
            "summary": format!("Found {} relevant results for your query.", combined.len()),
        })
    }
}

#[async_trait]
impl Tool for KnowledgeBaseSearchTool {
    fn name(&self) -> &str {
        "knowledge_base_search"
    }

    fn description(&self) -> &str {
        "Searches the shared pension knowledge base together with the user's \
         uploaded documents for general guidance on pensions, retirement \
         planning, and financial concepts."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query."},
                "user_id": {"type": "integer", "description": "Falls back to the authenticated caller."}
            },
            "required": ["query"]
        })
    }

    async fn call(&self, input: ToolInput) -> Result<String> {
        Ok(self.execute(&input).await.to_string())
    }
}
