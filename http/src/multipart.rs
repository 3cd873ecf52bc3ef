//! `multipart/form-data` request bodies.
//!
//! The body is buffered through [`Inbound::read_body`](crate::Inbound::read_body)
//! first, so the same size limit applies and the form can be parsed again
//! by later chain elements.

use crate::error::ContextError;
use bytes::Bytes;
use std::collections::HashMap;
use std::convert::Infallible;

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct FormFile {
    /// Form field the file was submitted under.
    pub field: String,
    /// Client-supplied file name.
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl FormFile {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Parsed form. Repeated fields keep their submission order.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    values: HashMap<String, Vec<String>>,
    files: HashMap<String, Vec<FormFile>>,
}

impl MultipartForm {
    /// First text value of `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// First file uploaded under `name`.
    pub fn file(&self, name: &str) -> Option<&FormFile> {
        self.files(name).first()
    }

    pub fn files(&self, name: &str) -> &[FormFile] {
        self.files.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.files.is_empty()
    }
}

/// Boundary of a `multipart/form-data` content type.
pub(crate) fn boundary(content_type: &str) -> Result<String, ContextError> {
    multer::parse_boundary(content_type)
        .map_err(|_| ContextError::UnsupportedMediaType(content_type.to_string()))
}

pub(crate) async fn parse(
    body: Bytes,
    boundary: String,
    limit: usize,
) -> Result<MultipartForm, ContextError> {
    let stream = futures_util::stream::iter([Ok::<Bytes, Infallible>(body)]);
    let constraints = multer::Constraints::new()
        .size_limit(multer::SizeLimit::new().whole_stream(limit as u64));
    let mut multipart = multer::Multipart::with_constraints(stream, boundary, constraints);

    let mut form = MultipartForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| rejected(e, limit))? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await.map_err(|e| rejected(e, limit))?;

        match file_name {
            Some(file_name) => form.files.entry(name.clone()).or_default().push(FormFile {
                field: name,
                file_name,
                content_type,
                data,
            }),
            None => form
                .values
                .entry(name)
                .or_default()
                .push(String::from_utf8_lossy(&data).into_owned()),
        }
    }
    Ok(form)
}

fn rejected(err: multer::Error, limit: usize) -> ContextError {
    match err {
        multer::Error::StreamSizeExceeded { .. } => ContextError::PayloadTooLarge { limit },
        other => ContextError::MalformedBody(other.into()),
    }
}
