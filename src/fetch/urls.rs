// src/fetch/urls.rs
use crate::config::validate_year;
use crate::error::{PipelineError, Result};

/// Fill `{year}` in an archive URL template.
pub fn scr_archive_url(template: &str, year: i32) -> Result<String> {
    validate_year(year)?;
    if !template.contains("{year}") {
        return Err(PipelineError::InvalidArgument(format!(
            "archive URL template has no {{year}} placeholder: {}",
            template
        )));
    }
    Ok(template.replace("{year}", &year.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SCR_ARCHIVE_URL_TEMPLATE;

    #[test]
    fn test_default_template() {
        assert_eq!(
            scr_archive_url(SCR_ARCHIVE_URL_TEMPLATE, 2019).unwrap(),
            "https://www.bcb.gov.br/pda/desig/scrdata_2019.zip"
        );
    }

    #[test]
    fn test_template_without_placeholder() {
        assert!(scr_archive_url("http://x/scr.zip", 2019).is_err());
    }

    #[test]
    fn test_year_checked_first() {
        assert!(matches!(
            scr_archive_url(SCR_ARCHIVE_URL_TEMPLATE, 1850),
            Err(PipelineError::InvalidArgument(_))
        ));
    }
}
