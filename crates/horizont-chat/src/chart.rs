//! Chart data recovery from generated text.
//!
//! The completion service is asked to wrap chart data in
//! `[GRAFICO_DADOS] ... [/GRAFICO_DADOS]`. When no marker pair is present the
//! extractor falls back to scanning balanced `{...}` fragments and takes the
//! first one that decodes into a complete chart. Every failure is absorbed
//! here and reported as "no chart".

use serde::Deserialize;
use tracing::debug;

use horizont_core::types::{ChartSpec, CHART_CLOSE_MARKER, CHART_OPEN_MARKER};

/// Why a candidate payload was rejected. Never leaves this module.
#[derive(Debug, thiserror::Error)]
enum ChartError {
    #[error("payload is not valid JSON: {0}")]
    Decode(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload does not match the chart schema: {0}")]
    Schema(String),
    #[error("invalid chart: {0}")]
    Invalid(&'static str),
}

/// Result of running the extractor over an assistant reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub chart: Option<ChartSpec>,
    /// Reply text to store. Markers and payload are removed only when a
    /// marker-delimited chart was extracted; otherwise the input verbatim.
    pub text: String,
}

/// Stateless chart extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChartExtractor;

impl ChartExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Recover a validated chart from `text`, if any.
    pub fn extract(&self, text: &str) -> Option<ChartSpec> {
        self.extract_and_strip(text).chart
    }

    /// Recover a chart and return the text with the marker block removed.
    pub fn extract_and_strip(&self, text: &str) -> Extraction {
        if let Some((open, body_start, body_end, close_end)) = find_marker_pair(text) {
            return match parse_candidate(&text[body_start..body_end]) {
                Ok(chart) => {
                    let stripped = format!("{}{}", &text[..open], &text[close_end..]);
                    Extraction {
                        chart: Some(chart),
                        text: stripped.trim().to_string(),
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Discarding marker-delimited chart payload");
                    Extraction {
                        chart: None,
                        text: text.to_string(),
                    }
                }
            };
        }

        Extraction {
            chart: scan_braces(text),
            text: text.to_string(),
        }
    }
}

/// Byte offsets of the first open marker and the first close marker after
/// it: `(open, body_start, body_end, close_end)`.
fn find_marker_pair(text: &str) -> Option<(usize, usize, usize, usize)> {
    let open = text.find(CHART_OPEN_MARKER)?;
    let body_start = open + CHART_OPEN_MARKER.len();
    let body_end = body_start + text[body_start..].find(CHART_CLOSE_MARKER)?;
    Some((open, body_start, body_end, body_end + CHART_CLOSE_MARKER.len()))
}

/// Try every `{` in position order and accept the first balanced fragment
/// that parses into a valid chart.
fn scan_braces(text: &str) -> Option<ChartSpec> {
    let bytes = text.as_bytes();
    for (start, _) in bytes.iter().enumerate().filter(|(_, b)| **b == b'{') {
        let Some(end) = matching_brace(bytes, start) else {
            continue;
        };
        match parse_candidate(&text[start..=end]) {
            Ok(chart) => return Some(chart),
            Err(e) => debug!(offset = start, error = %e, "Heuristic chart candidate rejected"),
        }
    }
    None
}

/// Offset of the `}` closing the `{` at `start`, skipping braces inside
/// JSON string literals.
fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_candidate(candidate: &str) -> Result<ChartSpec, ChartError> {
    let value: serde_json::Value =
        serde_json::from_str(candidate.trim()).map_err(|e| ChartError::Decode(e.to_string()))?;
    if !value.is_object() {
        return Err(ChartError::NotAnObject);
    }
    let chart = ChartSpec::deserialize(value).map_err(|e| ChartError::Schema(e.to_string()))?;
    validate(&chart)?;
    Ok(chart)
}

fn validate(chart: &ChartSpec) -> Result<(), ChartError> {
    if chart.title.trim().is_empty() {
        return Err(ChartError::Invalid("title is empty"));
    }
    if chart.years == 0 {
        return Err(ChartError::Invalid("years must be positive"));
    }
    if !chart.initial_value.is_finite() || chart.initial_value < 0.0 {
        return Err(ChartError::Invalid("initialValue must be a non-negative number"));
    }
    if chart.products.is_empty() {
        return Err(ChartError::Invalid("products is empty"));
    }
    for rate in chart.products.values() {
        let monthly_ok = rate.monthly_rate.map_or(true, f64::is_finite);
        if !rate.rate.is_finite() || !rate.yearly_multiplier.is_finite() || !monthly_ok {
            return Err(ChartError::Invalid("product rates must be finite numbers"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use horizont_core::types::{ChartKind, QuotedRate};

    const SCENARIO_REPLY: &str = r#"Hi there [GRAFICO_DADOS]{"type":"single","title":"X","years":5,"initialValue":1000,"products":{"A":{"rate":10,"yearlyMultiplier":1.1}}}[/GRAFICO_DADOS]"#;

    #[test]
    fn test_marker_delimited_chart() {
        let chart = ChartExtractor::new().extract(SCENARIO_REPLY).unwrap();
        assert_eq!(chart.kind, ChartKind::Single);
        assert_eq!(chart.title, "X");
        assert_eq!(chart.years, 5);
        assert_eq!(chart.initial_value, 1000.0);
        assert_eq!(chart.products.len(), 1);
        assert_eq!(chart.products["A"].yearly_multiplier, 1.1);
        assert!(chart.products["A"].monthly_rate.is_none());
    }

    #[test]
    fn test_marked_block_is_recovered_unchanged() {
        let spec = ChartSpec::comparison(532_150.75, 7, None);
        let text = format!(
            "Segue o comparativo:\n\n{}\n\nPosso detalhar?",
            spec.to_marked_block().unwrap()
        );
        assert_eq!(ChartExtractor::new().extract(&text), Some(spec));

        let single = ChartSpec::single("Horizont Smart", 80_000.0, 2, QuotedRate::Monthly(0.012));
        let text = single.to_marked_block().unwrap();
        assert_eq!(ChartExtractor::new().extract(&text), Some(single));
    }

    /// Deterministic xorshift in `[0, 1)` so failures are reproducible.
    fn next_unit(state: &mut u64) -> f64 {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        (*state >> 11) as f64 / (1u64 << 53) as f64
    }

    #[test]
    fn test_generated_charts_round_trip_exactly() {
        let extractor = ChartExtractor::new();
        let mut seed = 0x2545_f491_4f6c_dd1du64;

        for i in 0..20_000u32 {
            let initial = next_unit(&mut seed) * 10_000_000.0;
            let rate = next_unit(&mut seed) * 0.05;
            let spec = match i % 3 {
                0 => ChartSpec::single("P", initial, 1 + i % 30, QuotedRate::Monthly(rate)),
                1 => ChartSpec::single("P", initial, 1 + i % 30, QuotedRate::Yearly(rate * 1000.0)),
                _ => ChartSpec::comparison(initial, 1 + i % 30, None),
            };
            let text = format!("Projeção:\n{}", spec.to_marked_block().unwrap());
            let extraction = extractor.extract_and_strip(&text);
            assert_eq!(extraction.chart.as_ref(), Some(&spec), "initial={:?} rate={:?}", initial, rate);
            assert_eq!(extraction.text, "Projeção:");
        }
    }

    #[test]
    fn test_strip_removes_block_and_trims() {
        let extraction = ChartExtractor::new().extract_and_strip(SCENARIO_REPLY);
        assert!(extraction.chart.is_some());
        assert_eq!(extraction.text, "Hi there");

        let text = format!("Antes\n{}\nDepois", &SCENARIO_REPLY[9..]);
        let extraction = ChartExtractor::new().extract_and_strip(&text);
        assert!(extraction.chart.is_some());
        assert_eq!(extraction.text, "Antes\n\nDepois");
    }

    #[test]
    fn test_missing_close_marker_is_no_data() {
        let text = r#"[GRAFICO_DADOS]{"type":"single","title":"X","years":5,"initialValue":1000,"products":{"A":{"rate":10,"yearlyMultiplier":1.1}}}"#;
        // No marker pair, so the heuristic scan still finds the object.
        assert!(ChartExtractor::new().extract(text).is_some());

        let text = "[GRAFICO_DADOS] sem dados";
        assert!(ChartExtractor::new().extract(text).is_none());
    }

    #[test]
    fn test_close_before_open_is_not_a_pair() {
        let text = "[/GRAFICO_DADOS] texto [GRAFICO_DADOS]";
        let extraction = ChartExtractor::new().extract_and_strip(text);
        assert!(extraction.chart.is_none());
        assert_eq!(extraction.text, text);
    }

    #[test]
    fn test_malformed_payload_is_no_data_and_text_kept() {
        let text = "Veja [GRAFICO_DADOS]{\"type\": \"single\", title: }[/GRAFICO_DADOS] fim";
        let extraction = ChartExtractor::new().extract_and_strip(text);
        assert!(extraction.chart.is_none());
        assert_eq!(extraction.text, text);
    }

    #[test]
    fn test_invalid_marker_payload_does_not_fall_back_to_scan() {
        let valid = r#"{"type":"single","title":"Y","years":1,"initialValue":5,"products":{"B":{"rate":1,"yearlyMultiplier":1.01}}}"#;
        let text = format!("[GRAFICO_DADOS][1,2,3][/GRAFICO_DADOS] depois {}", valid);
        assert!(ChartExtractor::new().extract(&text).is_none());
    }

    #[test]
    fn test_missing_required_fields_rejected() {
        let cases = [
            r#"{"title":"X","years":5,"initialValue":1000,"products":{"A":{"rate":10,"yearlyMultiplier":1.1}}}"#,
            r#"{"type":"single","years":5,"initialValue":1000,"products":{"A":{"rate":10,"yearlyMultiplier":1.1}}}"#,
            r#"{"type":"single","title":"X","initialValue":1000,"products":{"A":{"rate":10,"yearlyMultiplier":1.1}}}"#,
            r#"{"type":"single","title":"X","years":5,"products":{"A":{"rate":10,"yearlyMultiplier":1.1}}}"#,
            r#"{"type":"single","title":"X","years":5,"initialValue":1000}"#,
            r#"{"type":"single","title":"X","years":5,"initialValue":1000,"products":{"A":{"rate":10}}}"#,
        ];
        for payload in cases {
            let text = format!("[GRAFICO_DADOS]{}[/GRAFICO_DADOS]", payload);
            assert!(ChartExtractor::new().extract(&text).is_none(), "{}", payload);
        }
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let cases = [
            r#"{"type":"pie","title":"X","years":5,"initialValue":1000,"products":{"A":{"rate":10,"yearlyMultiplier":1.1}}}"#,
            r#"{"type":"single","title":"  ","years":5,"initialValue":1000,"products":{"A":{"rate":10,"yearlyMultiplier":1.1}}}"#,
            r#"{"type":"single","title":"X","years":0,"initialValue":1000,"products":{"A":{"rate":10,"yearlyMultiplier":1.1}}}"#,
            r#"{"type":"single","title":"X","years":-2,"initialValue":1000,"products":{"A":{"rate":10,"yearlyMultiplier":1.1}}}"#,
            r#"{"type":"single","title":"X","years":5,"initialValue":-1,"products":{"A":{"rate":10,"yearlyMultiplier":1.1}}}"#,
            r#"{"type":"single","title":"X","years":5,"initialValue":1000,"products":{}}"#,
        ];
        for payload in cases {
            assert!(ChartExtractor::new().extract(payload).is_none(), "{}", payload);
        }
    }

    #[test]
    fn test_zero_initial_value_accepted() {
        let payload = r#"{"type":"comparison","title":"Z","years":3,"initialValue":0,"products":{"CDI":{"rate":10.88,"yearlyMultiplier":1.1088}}}"#;
        let chart = ChartExtractor::new().extract(payload).unwrap();
        assert_eq!(chart.initial_value, 0.0);
        assert_eq!(chart.kind, ChartKind::Comparison);
    }

    #[test]
    fn test_heuristic_takes_first_valid_fragment() {
        let first = r#"{"type":"single","title":"Primeiro","years":2,"initialValue":10,"products":{"A":{"rate":1,"yearlyMultiplier":1.01}}}"#;
        let second = r#"{"type":"single","title":"Segundo","years":2,"initialValue":10,"products":{"A":{"rate":1,"yearlyMultiplier":1.01}}}"#;
        let text = format!(
            "Config {{\"debug\": true}} e depois {} e também {}",
            first, second
        );
        let chart = ChartExtractor::new().extract_and_strip(&text);
        assert_eq!(chart.chart.unwrap().title, "Primeiro");
        assert_eq!(chart.text, text);
    }

    #[test]
    fn test_heuristic_ignores_braces_inside_strings() {
        let text = r#"Resultado: {"type":"single","title":"Taxa {anual} } ok","years":1,"initialValue":100,"products":{"A":{"rate":5,"yearlyMultiplier":1.05}}} fim"#;
        let chart = ChartExtractor::new().extract(text).unwrap();
        assert_eq!(chart.title, "Taxa {anual} } ok");
    }

    #[test]
    fn test_unbalanced_and_plain_text_yield_nothing() {
        assert!(ChartExtractor::new().extract("").is_none());
        assert!(ChartExtractor::new().extract("Sem gráfico aqui.").is_none());
        assert!(ChartExtractor::new().extract("{{{{ \"type\": ").is_none());
        assert!(ChartExtractor::new().extract("}}} {\"a\": \"\\\"}\"}").is_none());
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let payload = r##"{"type":"comparison","title":"C","years":5,"initialValue":1000,"customData":true,"products":{"CDI":{"rate":10.88,"yearlyMultiplier":1.1088,"color":"#00f"}}}"##;
        assert!(ChartExtractor::new().extract(payload).is_some());
    }
}
