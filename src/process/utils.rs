use arrow::datatypes::DataType;

/// 1) Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// 2) Infer Arrow dtype from a cleaned string. Only plain `f64` literals
///    count as numbers; locale-formatted values stay text for the transform.
pub fn infer_arrow_dtype_from_str(s: &str) -> DataType {
    if s.parse::<f64>().is_ok() {
        DataType::Float64
    } else {
        DataType::Utf8
    }
}

/// Pick the field delimiter for a sample: `;` only when it strictly
/// outnumbers `,`.
pub fn sniff_delimiter(sample: &str) -> u8 {
    let semis = sample.matches(';').count();
    let commas = sample.matches(',').count();
    if semis > commas {
        b';'
    } else {
        b','
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

/// Decode file bytes as UTF-8 (dropping a BOM), falling back to Latin-1.
/// Latin-1 maps every byte to a char, so the fallback cannot fail.
pub fn decode_text(bytes: Vec<u8>) -> (String, TextEncoding) {
    match String::from_utf8(bytes) {
        Ok(mut s) => {
            if s.starts_with('\u{feff}') {
                s.drain(..'\u{feff}'.len_utf8());
            }
            (s, TextEncoding::Utf8)
        }
        Err(e) => {
            let s = e.into_bytes().iter().map(|&b| b as char).collect();
            (s, TextEncoding::Latin1)
        }
    }
}

/// `"Carteira Ativa "` → `"carteira_ativa"`, `"Inadimplência"` → `"inadimplencia"`.
pub fn normalize_column_name(name: &str) -> String {
    name.to_lowercase()
        .trim()
        .chars()
        .map(|c| match c {
            ' ' => '_',
            'ç' => 'c',
            'ã' | 'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            other => other,
        })
        .collect()
}
