//! Parameter<T> - declarative SCPI parameter binding
//!
//! Every instrument setting is a typed `Parameter<T>` bound to a get query,
//! an optional set command template, a validator and a pair of conversion
//! functions between `T` and the SCPI text the instrument speaks.
//!
//! # Architecture
//!
//! ```text
//! Parameter<T>
//!   ├─ get_cmd / set_cmd      (SCPI strings, set template has a `{value}` slot)
//!   ├─ validator: Validator<T> (checked before anything is written)
//!   ├─ get_parser / set_formatter
//!   ├─ adapter: Arc<dyn ScpiAdapter>
//!   └─ latest: watch channel  (last value set or read)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let nplc = Parameter::<f64>::builder("nplc", adapter.clone())
//!     .label("Integration Time (NPLC)")
//!     .get_cmd("SENS:VOLT:NPLC?")
//!     .set_cmd("SENS:VOLT:NPLC {value}")
//!     .range(0.01, 50.0)
//!     .build();
//!
//! nplc.set(5.0).await?;            // writes "SENS:VOLT:NPLC 5"
//! let value = nplc.get().await?;   // queries "SENS:VOLT:NPLC?"
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::adapters::ScpiAdapter;
use crate::error::{AppResult, ProbeError};

// =============================================================================
// Value codecs
// =============================================================================

/// Conversion between a Rust value and its SCPI text form.
///
/// `to_scpi` renders the value for a set command, `from_scpi` parses a raw
/// query response. Parse failures return a short reason that ends up in
/// [`ProbeError::Parse`].
pub trait ScpiValue: Clone + Debug + Send + Sync + 'static {
    /// Render for a set command
    fn to_scpi(&self) -> String;

    /// Parse a query response
    fn from_scpi(response: &str) -> Result<Self, String>;
}

impl ScpiValue for f64 {
    fn to_scpi(&self) -> String {
        self.to_string()
    }

    fn from_scpi(response: &str) -> Result<Self, String> {
        response
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("expected a number ({})", e))
    }
}

impl ScpiValue for u32 {
    fn to_scpi(&self) -> String {
        self.to_string()
    }

    // Counts come back as "+1" or "1.000000E+00" depending on firmware
    fn from_scpi(response: &str) -> Result<Self, String> {
        let trimmed = response.trim();
        if let Ok(value) = trimmed.trim_start_matches('+').parse::<u32>() {
            return Ok(value);
        }
        let value = f64::from_scpi(trimmed)?;
        if value.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&value) {
            Ok(value as u32)
        } else {
            Err(format!("expected an unsigned integer, got {}", value))
        }
    }
}

impl ScpiValue for bool {
    fn to_scpi(&self) -> String {
        if *self { "ON" } else { "OFF" }.to_string()
    }

    fn from_scpi(response: &str) -> Result<Self, String> {
        match response.trim().to_ascii_uppercase().as_str() {
            "ON" | "1" => Ok(true),
            "OFF" | "0" => Ok(false),
            other => Err(format!("expected ON/OFF, got '{}'", other)),
        }
    }
}

/// `None` maps to the SCPI token `NONE` (used for "disabled" settings)
impl ScpiValue for Option<f64> {
    fn to_scpi(&self) -> String {
        match self {
            Some(value) => value.to_scpi(),
            None => "NONE".to_string(),
        }
    }

    fn from_scpi(response: &str) -> Result<Self, String> {
        if response.trim().eq_ignore_ascii_case("NONE") {
            Ok(None)
        } else {
            f64::from_scpi(response).map(Some)
        }
    }
}

/// Enumerated SCPI setting with a short mnemonic and a long form
///
/// The short mnemonic is written; either form is accepted on read, case
/// insensitive. Implementors forward their [`ScpiValue`] impl to
/// [`ScpiEnum::to_scpi_enum`] and [`ScpiEnum::parse_scpi_enum`].
pub trait ScpiEnum: Copy + Debug + 'static {
    /// All variants, in declaration order
    const VARIANTS: &'static [Self];

    /// Short form, e.g. `"MOV"`
    fn mnemonic(&self) -> &'static str;

    /// Long form, e.g. `"MOVing"`
    fn long_form(&self) -> &'static str;

    /// Render the short mnemonic
    fn to_scpi_enum(&self) -> String {
        self.mnemonic().to_string()
    }

    /// Match a response against the short and long forms of every variant
    fn parse_scpi_enum(response: &str) -> Result<Self, String> {
        let token = normalize_token(response);
        Self::VARIANTS
            .iter()
            .copied()
            .find(|v| token == v.mnemonic() || token == v.long_form().to_ascii_uppercase())
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::VARIANTS.iter().map(|v| v.mnemonic()).collect();
                format!("expected one of {:?}, got '{}'", allowed, token)
            })
    }
}

/// Normalise an enumerated response: strip quotes, drop any `:DC`-style
/// suffix and upper-case it, so `"\"CURR:DC\""` becomes `"CURR"`.
pub(crate) fn normalize_token(response: &str) -> String {
    let unquoted = response.trim().trim_matches('"');
    unquoted
        .split(':')
        .next()
        .unwrap_or(unquoted)
        .trim()
        .to_ascii_uppercase()
}

/// Render a SCPI command template such as `":SYST:BEEP {freq},{duration}"`.
pub(crate) fn format_command(template: &str, vars: &[(&str, String)]) -> AppResult<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    strfmt::strfmt(template, &vars)
        .map_err(|e| ProbeError::CommandFormat(format!("'{}': {}", template, e)))
}

// =============================================================================
// Validators
// =============================================================================

/// Value validator, checked before a set command is sent
///
/// Booleans and enumerations are validated by their Rust type; numeric
/// settings use `Range`.
#[derive(Clone)]
pub enum Validator<T> {
    /// No constraints - all values accepted.
    None,

    /// Numeric range constraint (inclusive bounds). NaN never passes.
    Range {
        /// Minimum allowed value (inclusive).
        min: T,
        /// Maximum allowed value (inclusive).
        max: T,
    },

    /// Value must match one of the provided choices exactly.
    Choices(Vec<T>),

    /// Custom validation function returning a reason on failure.
    Custom(Arc<dyn Fn(&T) -> Result<(), String> + Send + Sync>),
}

impl<T: PartialOrd + Debug> Validator<T> {
    /// Validate `value` for the parameter called `name`
    pub fn validate(&self, name: &str, value: &T) -> AppResult<()> {
        let result = match self {
            Validator::None => Ok(()),
            Validator::Range { min, max } => {
                let above_min = matches!(
                    value.partial_cmp(min),
                    Some(Ordering::Greater | Ordering::Equal)
                );
                let below_max = matches!(
                    value.partial_cmp(max),
                    Some(Ordering::Less | Ordering::Equal)
                );
                if above_min && below_max {
                    Ok(())
                } else {
                    Err(format!(
                        "{:?} is outside [{:?}, {:?}]",
                        value, min, max
                    ))
                }
            }
            Validator::Choices(choices) => {
                if choices.iter().any(|c| c == value) {
                    Ok(())
                } else {
                    Err(format!("{:?} is not one of {:?}", value, choices))
                }
            }
            Validator::Custom(check) => check(value),
        };
        result.map_err(|reason| ProbeError::InvalidArgument(format!("{}: {}", name, reason)))
    }
}

impl<T: Debug> Debug for Validator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Validator::None => write!(f, "None"),
            Validator::Range { min, max } => f
                .debug_struct("Range")
                .field("min", min)
                .field("max", max)
                .finish(),
            Validator::Choices(choices) => f.debug_tuple("Choices").field(choices).finish(),
            Validator::Custom(_) => write!(f, "Custom(<function>)"),
        }
    }
}

// =============================================================================
// Parameter<T>
// =============================================================================

/// Typed instrument parameter bound to SCPI commands
///
/// `set()` validates, renders and writes; `get()` queries and parses. Both
/// record the value so the last known state is available through
/// [`Parameter::cached`] and [`Parameter::subscribe`] without touching the
/// instrument.
pub struct Parameter<T: ScpiValue> {
    name: String,
    label: Option<String>,
    unit: Option<String>,
    docstring: Option<String>,
    get_cmd: Option<String>,
    set_cmd: Option<String>,
    validator: Validator<T>,
    get_parser: fn(&str) -> Result<T, String>,
    set_formatter: fn(&T) -> String,
    adapter: Arc<dyn ScpiAdapter>,
    latest: watch::Sender<Option<T>>,
}

impl<T: ScpiValue + PartialOrd> Parameter<T> {
    /// Start building a parameter that talks through `adapter`
    pub fn builder(name: impl Into<String>, adapter: Arc<dyn ScpiAdapter>) -> ParameterBuilder<T> {
        ParameterBuilder::new(name, adapter)
    }

    /// Query the instrument and parse the response
    ///
    /// # Errors
    /// - `InvalidOperation` if the parameter has no get command
    /// - `Communication` if the adapter fails
    /// - `Parse` if the response does not parse
    pub async fn get(&self) -> AppResult<T> {
        let command = self.get_cmd.as_deref().ok_or_else(|| {
            ProbeError::InvalidOperation(format!("parameter '{}' is write-only", self.name))
        })?;

        let response = self.adapter.ask(command).await?;
        let value = (self.get_parser)(&response)
            .map_err(|reason| ProbeError::parse(command, response.as_str(), reason))?;

        debug!(parameter = %self.name, ?value, "read parameter");
        self.latest.send_replace(Some(value.clone()));
        Ok(value)
    }

    /// Validate `value` and write it to the instrument
    ///
    /// Nothing is sent when validation fails.
    ///
    /// # Errors
    /// - `InvalidOperation` if the parameter has no set command
    /// - `InvalidArgument` if validation fails
    /// - `Communication` if the adapter fails
    pub async fn set(&self, value: T) -> AppResult<()> {
        let template = self.set_cmd.as_deref().ok_or_else(|| {
            ProbeError::InvalidOperation(format!("parameter '{}' is read-only", self.name))
        })?;

        self.validator.validate(&self.name, &value)?;
        let command = format_command(template, &[("value", (self.set_formatter)(&value))])?;

        debug!(parameter = %self.name, %command, "set parameter");
        self.adapter.write(&command).await?;
        self.latest.send_replace(Some(value));
        Ok(())
    }

    /// Last value set or read, without talking to the instrument
    pub fn cached(&self) -> Option<T> {
        self.latest.borrow().clone()
    }

    /// Subscribe to value changes
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.latest.subscribe()
    }

    /// Parameter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable label
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Unit of measurement
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Description of the parameter
    pub fn docstring(&self) -> Option<&str> {
        self.docstring.as_deref()
    }

    /// SCPI query, if the parameter is readable
    pub fn get_cmd(&self) -> Option<&str> {
        self.get_cmd.as_deref()
    }

    /// SCPI set template, if the parameter is writable
    pub fn set_cmd(&self) -> Option<&str> {
        self.set_cmd.as_deref()
    }

    /// Validator applied by `set()`
    pub fn validator(&self) -> &Validator<T> {
        &self.validator
    }
}

// =============================================================================
// Parameter Builder (Fluent API)
// =============================================================================

/// Builder for [`Parameter`]
///
/// Defaults: no commands, no validation, and the `ScpiValue` codec of `T`
/// for both directions.
pub struct ParameterBuilder<T: ScpiValue> {
    name: String,
    adapter: Arc<dyn ScpiAdapter>,
    label: Option<String>,
    unit: Option<String>,
    docstring: Option<String>,
    get_cmd: Option<String>,
    set_cmd: Option<String>,
    validator: Validator<T>,
    get_parser: fn(&str) -> Result<T, String>,
    set_formatter: fn(&T) -> String,
}

impl<T: ScpiValue + PartialOrd> ParameterBuilder<T> {
    /// Create a new parameter builder.
    pub fn new(name: impl Into<String>, adapter: Arc<dyn ScpiAdapter>) -> Self {
        Self {
            name: name.into(),
            adapter,
            label: None,
            unit: None,
            docstring: None,
            get_cmd: None,
            set_cmd: None,
            validator: Validator::None,
            get_parser: T::from_scpi,
            set_formatter: T::to_scpi,
        }
    }

    /// Set human-readable label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set unit of measurement.
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set description.
    pub fn docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
        self
    }

    /// Set the SCPI query (e.g. `"SENS:VOLT:NPLC?"`).
    pub fn get_cmd(mut self, command: impl Into<String>) -> Self {
        self.get_cmd = Some(command.into());
        self
    }

    /// Set the SCPI set template; `{value}` is replaced by the formatted value.
    pub fn set_cmd(mut self, template: impl Into<String>) -> Self {
        self.set_cmd = Some(template.into());
        self
    }

    /// Inclusive numeric range.
    pub fn range(mut self, min: T, max: T) -> Self {
        self.validator = Validator::Range { min, max };
        self
    }

    /// Discrete set of allowed values.
    pub fn choices(mut self, choices: Vec<T>) -> Self {
        self.validator = Validator::Choices(choices);
        self
    }

    /// Custom validation function.
    pub fn validator(
        mut self,
        check: impl Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Validator::Custom(Arc::new(check));
        self
    }

    /// Override the response parser.
    pub fn get_parser(mut self, parser: fn(&str) -> Result<T, String>) -> Self {
        self.get_parser = parser;
        self
    }

    /// Override how values are rendered into the set template.
    pub fn set_formatter(mut self, formatter: fn(&T) -> String) -> Self {
        self.set_formatter = formatter;
        self
    }

    /// Build the parameter.
    pub fn build(self) -> Parameter<T> {
        let (latest, _) = watch::channel(None);
        Parameter {
            name: self.name,
            label: self.label,
            unit: self.unit,
            docstring: self.docstring,
            get_cmd: self.get_cmd,
            set_cmd: self.set_cmd,
            validator: self.validator,
            get_parser: self.get_parser,
            set_formatter: self.set_formatter,
            adapter: self.adapter,
            latest,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;

    fn nplc(mock: &MockAdapter) -> Parameter<f64> {
        Parameter::builder("nplc", Arc::new(mock.clone()))
            .label("Integration Time (NPLC)")
            .get_cmd("SENS:VOLT:NPLC?")
            .set_cmd("SENS:VOLT:NPLC {value}")
            .range(0.01, 50.0)
            .build()
    }

    #[tokio::test]
    async fn test_set_writes_rendered_command() {
        let mock = MockAdapter::new();
        let param = nplc(&mock);

        param.set(5.0).await.unwrap();
        assert_eq!(mock.call_log(), vec!["SENS:VOLT:NPLC 5"]);
        assert_eq!(param.cached(), Some(5.0));
    }

    #[tokio::test]
    async fn test_range_validation_sends_nothing() {
        let mock = MockAdapter::new();
        let param = nplc(&mock);

        assert!(matches!(
            param.set(51.0).await,
            Err(ProbeError::InvalidArgument(_))
        ));
        assert!(matches!(
            param.set(0.001).await,
            Err(ProbeError::InvalidArgument(_))
        ));
        assert!(matches!(
            param.set(f64::NAN).await,
            Err(ProbeError::InvalidArgument(_))
        ));
        assert!(mock.call_log().is_empty());
        assert_eq!(param.cached(), None);
    }

    #[tokio::test]
    async fn test_get_parses_response() {
        let mock = MockAdapter::new();
        mock.push_response("SENS:VOLT:NPLC?", "+1.000000E+00");
        let param = nplc(&mock);

        assert_eq!(param.get().await.unwrap(), 1.0);
        assert_eq!(param.cached(), Some(1.0));
    }

    #[tokio::test]
    async fn test_get_parse_failure() {
        let mock = MockAdapter::new();
        mock.push_response("SENS:VOLT:NPLC?", "garbage");
        let param = nplc(&mock);

        match param.get().await {
            Err(ProbeError::Parse { command, response, .. }) => {
                assert_eq!(command, "SENS:VOLT:NPLC?");
                assert_eq!(response, "garbage");
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_communication_error_propagates() {
        let mock = MockAdapter::new();
        mock.inject_next_failure();
        let param = nplc(&mock);

        assert!(matches!(
            param.set(1.0).await,
            Err(ProbeError::Communication(_))
        ));
    }

    #[tokio::test]
    async fn test_bool_round_trip_through_echo() {
        let mock = MockAdapter::new();
        let autorange = Parameter::<bool>::builder("autorange", Arc::new(mock.clone()))
            .get_cmd("SENS:VOLT:RANG:AUTO?")
            .set_cmd("SENS:VOLT:RANG:AUTO {value}")
            .build();

        autorange.set(true).await.unwrap();
        assert_eq!(mock.writes(), vec!["SENS:VOLT:RANG:AUTO ON"]);
        assert!(autorange.get().await.unwrap());

        autorange.set(false).await.unwrap();
        assert!(!autorange.get().await.unwrap());
    }

    #[tokio::test]
    async fn test_read_only_and_write_only() {
        let mock = MockAdapter::new();
        let fetch = Parameter::<f64>::builder("fetch", Arc::new(mock.clone()))
            .get_cmd("FETC?")
            .build();
        let level = Parameter::<f64>::builder("level", Arc::new(mock.clone()))
            .set_cmd("SOUR:VOLT {value}")
            .build();

        assert!(matches!(
            fetch.set(1.0).await,
            Err(ProbeError::InvalidOperation(_))
        ));
        assert!(matches!(
            level.get().await,
            Err(ProbeError::InvalidOperation(_))
        ));
        assert!(mock.call_log().is_empty());
    }

    #[tokio::test]
    async fn test_choices_validation() {
        let mock = MockAdapter::new();
        let count = Parameter::<u32>::builder("count", Arc::new(mock.clone()))
            .set_cmd("COUN {value}")
            .choices(vec![1, 10, 100])
            .build();

        assert!(count.set(10).await.is_ok());
        assert!(matches!(
            count.set(11).await,
            Err(ProbeError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_subscription_sees_updates() {
        let mock = MockAdapter::new();
        let param = nplc(&mock);
        let mut rx = param.subscribe();

        assert_eq!(*rx.borrow(), None);
        param.set(2.0).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(2.0));
    }

    #[test]
    fn test_codecs() {
        assert_eq!(u32::from_scpi("+10").unwrap(), 10);
        assert_eq!(u32::from_scpi("1.000000E+01").unwrap(), 10);
        assert!(u32::from_scpi("1.5").is_err());
        assert!(bool::from_scpi("1").unwrap());
        assert!(!bool::from_scpi(" off ").unwrap());
        assert!(bool::from_scpi("MAYBE").is_err());
        assert_eq!(Option::<f64>::from_scpi("NONE").unwrap(), None);
        assert_eq!(Option::<f64>::from_scpi("0.1").unwrap(), Some(0.1));
        assert_eq!(None::<f64>.to_scpi(), "NONE");
        assert_eq!(normalize_token("\"CURR:DC\""), "CURR");
    }

    #[test]
    fn test_format_command() {
        let command = format_command(
            ":SYST:BEEP {freq},{duration}",
            &[("freq", "800".to_string()), ("duration", "1".to_string())],
        )
        .unwrap();
        assert_eq!(command, ":SYST:BEEP 800,1");

        assert!(matches!(
            format_command("SENS:VOLT {missing}", &[("value", "1".to_string())]),
            Err(ProbeError::CommandFormat(_))
        ));
    }
}
