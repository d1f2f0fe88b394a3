// FHIR Converter Error Types
//
// This module defines the error taxonomy shared by every stage of a conversion.
// Each failure carries a stable four-digit code whose first digit names the
// pipeline stage that raised it.

use std::fmt;
use thiserror::Error;

/// Result type used throughout the converter
pub type Result<T> = std::result::Result<T, FhirConverterError>;

/// Pipeline stage a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorFamily {
    TemplateLoad,
    DataParse,
    Render,
    PostProcess,
}

/// Stable numeric error codes. Callers branch on these, never on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FhirConverterErrorCode {
    // Template load
    TemplateFolderNotFound = 1101,
    TemplateNotFound = 1102,
    TemplateSyntaxError = 1103,
    InvalidCodeMapping = 1104,
    InvalidJsonSchema = 1105,
    NullOrEmptyRootTemplate = 1106,
    NullTemplateProvider = 1107,
    InvalidTemplateName = 1108,

    // Data parse
    NullOrWhiteSpaceInput = 1201,
    MissingHl7v2Separators = 1202,
    DuplicateHl7v2Separators = 1203,
    InvalidHl7v2EscapeCharacter = 1204,
    InputParsingError = 1205,

    // Render
    TemplateRenderingError = 1301,
    TimeoutError = 1302,
    PropertyNotFound = 1303,
    InvalidDateTimeFormat = 1304,
    InvalidTimeZoneHandling = 1305,
    InvalidIdGenerationInput = 1306,
    ReferencedTemplateNotFound = 1307,
    StackLevelExceeded = 1308,
    InvalidFilterArgument = 1309,
    OperationCanceled = 1310,

    // Post-process
    JsonParsingError = 1401,
    JsonMergingError = 1402,
    TraceInfoError = 1403,
    InvalidMessageDefinition = 1404,
}

impl FhirConverterErrorCode {
    /// Numeric value of the code
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Family implied by the leading digit
    pub fn family(self) -> ErrorFamily {
        match self.as_u16() / 100 {
            11 => ErrorFamily::TemplateLoad,
            12 => ErrorFamily::DataParse,
            13 => ErrorFamily::Render,
            _ => ErrorFamily::PostProcess,
        }
    }
}

impl fmt::Display for FhirConverterErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_u16())
    }
}

/// Errors that can occur while loading templates, parsing input, rendering or
/// post-processing
#[derive(Error, Debug)]
pub enum FhirConverterError {
    /// Template collection, template body, schema or code mapping could not be loaded
    #[error("Template load error [{code}]: {message}")]
    TemplateLoad {
        code: FhirConverterErrorCode,
        message: String,
    },

    /// Input data could not be parsed
    #[error("Data parse error [{code}]: {message}")]
    DataParse {
        code: FhirConverterErrorCode,
        message: String,
    },

    /// Template rendering failed
    #[error("Render error [{code}]: {message}")]
    Render {
        code: FhirConverterErrorCode,
        message: String,
        #[source]
        source: Option<Box<FhirConverterError>>,
    },

    /// Rendered output could not be turned into the final document
    #[error("Post-process error [{code}]: {message}")]
    PostProcess {
        code: FhirConverterErrorCode,
        message: String,
    },
}

impl FhirConverterError {
    pub fn template_load(code: FhirConverterErrorCode, message: impl Into<String>) -> Self {
        FhirConverterError::TemplateLoad {
            code,
            message: message.into(),
        }
    }

    pub fn data_parse(code: FhirConverterErrorCode, message: impl Into<String>) -> Self {
        FhirConverterError::DataParse {
            code,
            message: message.into(),
        }
    }

    pub fn render(code: FhirConverterErrorCode, message: impl Into<String>) -> Self {
        FhirConverterError::Render {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn post_process(code: FhirConverterErrorCode, message: impl Into<String>) -> Self {
        FhirConverterError::PostProcess {
            code,
            message: message.into(),
        }
    }

    /// Re-wraps a failure raised inside a render step.
    ///
    /// Render, template-load and post-process errors pass through unchanged so
    /// their codes survive; data-parse errors raised by filters become a generic
    /// rendering error with the original attached as the source.
    pub fn wrap_render(context: &str, error: FhirConverterError) -> Self {
        match error {
            FhirConverterError::Render { .. }
            | FhirConverterError::TemplateLoad { .. }
            | FhirConverterError::PostProcess { .. } => error,
            other => FhirConverterError::Render {
                code: FhirConverterErrorCode::TemplateRenderingError,
                message: format!("{}: {}", context, other),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Numeric code carried by the error
    pub fn code(&self) -> FhirConverterErrorCode {
        match self {
            FhirConverterError::TemplateLoad { code, .. }
            | FhirConverterError::DataParse { code, .. }
            | FhirConverterError::Render { code, .. }
            | FhirConverterError::PostProcess { code, .. } => *code,
        }
    }

    /// Pipeline stage the error was raised in
    pub fn family(&self) -> ErrorFamily {
        match self {
            FhirConverterError::TemplateLoad { .. } => ErrorFamily::TemplateLoad,
            FhirConverterError::DataParse { .. } => ErrorFamily::DataParse,
            FhirConverterError::Render { .. } => ErrorFamily::Render,
            FhirConverterError::PostProcess { .. } => ErrorFamily::PostProcess,
        }
    }

    /// Human-readable message without the code prefix
    pub fn message(&self) -> &str {
        match self {
            FhirConverterError::TemplateLoad { message, .. }
            | FhirConverterError::DataParse { message, .. }
            | FhirConverterError::Render { message, .. }
            | FhirConverterError::PostProcess { message, .. } => message,
        }
    }
}
