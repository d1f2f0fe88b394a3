// Conversion Processors
//
// A processor wires one data parser, a template provider and the renderer
// together. Argument checks happen before any parsing so that a cancelled
// call or a missing template never touches the input.

pub mod ccda;
pub mod fhir;
pub mod fhir_to_hl7v2;
pub mod hl7v2;
pub mod json;

use crate::code_mapping::CodeMapping;
use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use crate::model::Value;
use crate::parsers::DataParser;
use crate::post_process;
use crate::provider::{candidate_names, parent_path, TemplateProvider};
use crate::settings::ProcessorSettings;
use crate::template::{RenderContext, RenderVisitor};
use crate::trace::TraceInfo;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub use ccda::CcdaProcessor;
pub use fhir::FhirProcessor;
pub use fhir_to_hl7v2::FhirToHl7v2Processor;
pub use hl7v2::Hl7v2Processor;
pub use json::JsonProcessor;

/// Cooperative cancellation flag shared between a caller and a conversion
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with `OperationCanceled` once cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(FhirConverterError::render(
                FhirConverterErrorCode::OperationCanceled,
                "Conversion was cancelled",
            ))
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Input format handled by a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Hl7v2,
    Ccda,
    Json,
    Fhir,
}

impl DataType {
    /// Variable the parsed input is bound to in templates
    pub fn data_key(self) -> &'static str {
        match self {
            DataType::Hl7v2 => "hl7v2Data",
            DataType::Ccda | DataType::Json | DataType::Fhir => "msg",
        }
    }

    /// Template holding the code mapping table for this format
    pub fn code_mapping_name(self) -> &'static str {
        match self {
            DataType::Hl7v2 => "CodeSystem/CodeSystem",
            DataType::Ccda | DataType::Json | DataType::Fhir => "ValueSet/ValueSet",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Hl7v2 => "Hl7v2",
            DataType::Ccda => "Ccda",
            DataType::Json => "Json",
            DataType::Fhir => "Fhir",
        };
        f.write_str(name)
    }
}

/// Conversion entry point shared by every input format
pub trait Processor {
    fn data_type(&self) -> DataType;

    fn settings(&self) -> &ProcessorSettings;

    /// Converts `data` with `root_template`, filling `trace` when given
    fn convert(
        &self,
        data: &str,
        root_template: &str,
        provider: Option<&dyn TemplateProvider>,
        trace: Option<&mut TraceInfo>,
    ) -> Result<String> {
        self.convert_with_cancellation(data, root_template, provider, &CancellationToken::new(), trace)
    }

    /// As `convert`; the token is checked before any work starts
    fn convert_with_cancellation(
        &self,
        data: &str,
        root_template: &str,
        provider: Option<&dyn TemplateProvider>,
        cancellation: &CancellationToken,
        trace: Option<&mut TraceInfo>,
    ) -> Result<String>;
}

/// Validates the call arguments and returns the provider
pub(crate) fn check_arguments<'p>(
    root_template: &str,
    provider: Option<&'p dyn TemplateProvider>,
    cancellation: &CancellationToken,
) -> Result<&'p dyn TemplateProvider> {
    cancellation.check()?;
    if root_template.trim().is_empty() {
        return Err(FhirConverterError::template_load(
            FhirConverterErrorCode::NullOrEmptyRootTemplate,
            "Root template name is null or empty",
        ));
    }
    provider.ok_or_else(|| {
        FhirConverterError::template_load(
            FhirConverterErrorCode::NullTemplateProvider,
            "Template provider is null",
        )
    })
}

/// Rendered text plus the schemas `validate` blocks used
pub(crate) struct Rendered {
    pub text: String,
    pub validated_schemas: Vec<String>,
}

/// Loads the root template and code mapping, then renders with `data` bound
/// under the format's data key
pub(crate) fn render_root(
    settings: &ProcessorSettings,
    data_type: DataType,
    provider: &dyn TemplateProvider,
    root_template: &str,
    data: Value,
    mut globals: HashMap<String, Value>,
) -> Result<Rendered> {
    let template = provider.get_template(root_template).ok_or_else(|| {
        FhirConverterError::template_load(
            FhirConverterErrorCode::TemplateNotFound,
            format!("Root template '{}' not found", root_template),
        )
    })?;
    let code_mapping = load_code_mapping(provider, data_type, root_template)?;

    globals.insert(data_type.data_key().to_string(), data);

    #[cfg(feature = "trace")]
    let visitor = crate::template::LoggingVisitor::new();
    #[cfg(not(feature = "trace"))]
    let visitor = crate::template::NoopVisitor::new();

    let started = Instant::now();
    let mut context = RenderContext::new(settings)
        .with_provider(provider)
        .with_code_mapping(code_mapping.as_ref())
        .with_visitor(&visitor as &dyn RenderVisitor)
        .with_root_template(root_template);
    let text = context.render(&template, globals)?;
    log::debug!(
        "Rendered '{}' ({}) in {:?}, {} bytes",
        root_template,
        data_type,
        started.elapsed(),
        text.len()
    );

    Ok(Rendered {
        text,
        validated_schemas: context.into_validated_schemas(),
    })
}

/// Code mapping for `data_type`, looked up next to the root template first
fn load_code_mapping(
    provider: &dyn TemplateProvider,
    data_type: DataType,
    root_template: &str,
) -> Result<Option<CodeMapping>> {
    let parent = parent_path(root_template);
    for candidate in candidate_names(&parent, data_type.code_mapping_name()) {
        if let Some(mapping) = provider.get_code_mapping(&candidate)? {
            return Ok(Some(mapping));
        }
    }
    Ok(None)
}

/// Pipeline for formats parsed into a plain value tree (C-CDA, JSON, FHIR)
#[allow(clippy::too_many_arguments)]
pub(crate) fn convert_tree(
    settings: &ProcessorSettings,
    data_type: DataType,
    parser: &dyn DataParser,
    data: &str,
    root_template: &str,
    provider: Option<&dyn TemplateProvider>,
    cancellation: &CancellationToken,
    trace: Option<&mut TraceInfo>,
) -> Result<String> {
    let provider = check_arguments(root_template, provider, cancellation)?;
    log::debug!("Converting {} input with root template '{}'", data_type, root_template);

    let parsed = parser.parse(data)?;
    let rendered = render_root(settings, data_type, provider, root_template, parsed, HashMap::new())?;
    let output = post_process::process(&rendered.text)?;

    if let Some(trace) = trace {
        *trace = TraceInfo::from_schemas(rendered.validated_schemas);
    }
    Ok(output)
}
