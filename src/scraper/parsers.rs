use crate::error::ExtractError;
use scraper::{ElementRef, Html, Selector};

/// Institutional pages list at most this many days after the header in daily mode.
pub const DAILY_ROW_LIMIT: usize = 30;

fn selector(s: &str) -> Result<Selector, ExtractError> {
    Selector::parse(s).map_err(|e| ExtractError::Parse(format!("selector {:?}: {:?}", s, e)))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

// ── Institutional investors table (zcl.djhtm) ─────────────────────────────────

/// One data row as printed: date, foreign, investment trust, dealers, total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawInstitutionalRow {
    pub date: String,
    pub foreign: String,
    pub trust: String,
    pub dealers: String,
    pub total: String,
}

pub fn parse_institutional_page(html: &str, row_limit: Option<usize>) -> Result<Vec<RawInstitutionalRow>, ExtractError> {
    let doc = Html::parse_document(html);

    let t0_sel = selector("td.t0")?;
    let t01_sel = selector("table.t01")?;
    let tr_sel = selector("tr")?;
    let td_sel = selector("td")?;

    // Prefer a t01 table inside a t0 cell that actually has rows; the page
    // also carries small t01 tables for navigation.
    let table = doc
        .select(&t0_sel)
        .filter_map(|cell| cell.select(&t01_sel).next())
        .find(|t| t.select(&tr_sel).count() > 5)
        .or_else(|| doc.select(&t01_sel).next())
        .ok_or_else(|| ExtractError::NotFound("institutional table (table.t01)".into()))?;

    let rows: Vec<ElementRef<'_>> = table.select(&tr_sel).collect();
    let header = rows
        .iter()
        .position(|r| {
            let t = r.text().collect::<String>();
            t.contains("日期") && t.contains("外資")
        })
        .ok_or_else(|| ExtractError::NotFound("header row (日期/外資)".into()))?;

    let limit = row_limit.unwrap_or(usize::MAX);
    let mut out = Vec::new();

    for row in rows.iter().skip(header + 1).take(limit) {
        let mut values: Vec<String> = row
            .select(&td_sel)
            .map(text_of)
            .filter(|s| !s.is_empty())
            .collect();
        if values.len() < 5 {
            // Some layouts print a row as one cell of whitespace-separated values
            values = text_of(*row).split_whitespace().map(str::to_string).collect();
        }
        if values.len() < 5 || !looks_like_date(&values[0]) {
            continue;
        }

        out.push(RawInstitutionalRow {
            date: values[0].clone(),
            foreign: values[1].clone(),
            trust: values[2].clone(),
            dealers: values[3].clone(),
            total: values[4].clone(),
        });
    }

    Ok(out)
}

/// `\d+/\d+/\d+`
pub fn looks_like_date(s: &str) -> bool {
    let parts: Vec<&str> = s.split('/').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

// ── SMA legend (zcw1_<code>.djhtm) ────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmaReading {
    /// Date shown under the chart, `YYYY/MM/DD`
    pub date: Option<String>,
    /// (label, value) pairs in legend order, e.g. ("SMA5", "612.40")
    pub values: Vec<(String, String)>,
    /// The chart sometimes lives in an iframe
    pub iframe_src: Option<String>,
}

pub fn parse_sma_page(html: &str) -> Result<SmaReading, ExtractError> {
    let doc = Html::parse_document(html);

    let date_sel = selector(".opsBtmTitleK")?;
    let graph_sel = selector("#SysJustWebGraphDIV")?;
    let legend_sel = selector("[id*=\"fg0\"]")?;
    let span_sel = selector("span")?;
    let container_sel = selector("#SysJustIFRAMEDIV")?;
    let iframe_sel = selector("#SysJustIFRAMEDIV iframe")?;

    let mut reading = SmaReading {
        date: doc.select(&date_sel).next().map(text_of).filter(|s| !s.is_empty()),
        iframe_src: doc
            .select(&iframe_sel)
            .next()
            .and_then(|f| f.value().attr("src"))
            .map(str::to_string),
        ..Default::default()
    };

    let root = doc
        .select(&graph_sel)
        .next()
        .or_else(|| doc.select(&container_sel).next());
    let Some(root) = root else {
        return Ok(reading);
    };

    let legend = root.select(&legend_sel).next().unwrap_or(root);
    let spans: Vec<String> = legend
        .select(&span_sel)
        .map(text_of)
        .filter(|s| !s.is_empty())
        .collect();

    if !spans.is_empty() && spans.len() % 2 == 0 {
        reading.values = spans
            .chunks(2)
            .filter(|pair| pair[0].starts_with("SMA"))
            .map(|pair| (pair[0].clone(), pair[1].replace(',', "")))
            .collect();
    }
    if reading.values.is_empty() {
        reading.values = scan_sma_tokens(&legend.text().collect::<String>());
    }

    Ok(reading)
}

/// Pull `SMA<n> <value>` pairs out of free text.
pub fn scan_sma_tokens(text: &str) -> Vec<(String, String)> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut out = Vec::new();

    for pair in tokens.windows(2) {
        let (label, value) = (pair[0], pair[1]);
        let is_label = label.len() > 3
            && label.starts_with("SMA")
            && label[3..].chars().all(|c| c.is_ascii_digit());
        let cleaned = value.replace(',', "");
        if is_label && cleaned.parse::<f64>().is_ok() {
            out.push((label.to_string(), cleaned));
        }
    }
    out
}
