use crate::utils::delay::DelayBounds;
use crate::utils::error::{AcquireError, Result};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// 金鑰檔常見的容器格式
const KEY_FILE_EXTENSIONS: &[&str] = &["dat", "pfx", "p12", "jks", "zs2", "pk8"];

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field_name: &str, value: impl ToString, reason: impl Into<String>) -> AcquireError {
    AcquireError::InvalidConfigValueError {
        field: field_name.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// http(s) 且必須有主機名稱，路由都會以它為基底解析
pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(invalid(field_name, url_str, "URL cannot be empty"));
    }

    let url = Url::parse(url_str).map_err(|e| invalid(field_name, url_str, format!("Invalid URL format: {}", e)))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(invalid(field_name, url_str, format!("Unsupported URL scheme: {}", scheme))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid(field_name, url_str, "URL must name a host"));
    }
    Ok(())
}

/// 金鑰檔路徑：不可為空、不可含 NUL，副檔名需為已知的金鑰格式
pub fn validate_key_file(field_name: &str, path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(invalid(field_name, path, "Path cannot be empty"));
    }
    if path.contains('\0') {
        return Err(invalid(field_name, path, "Path contains null bytes"));
    }

    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension {
        Some(ext) if KEY_FILE_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(invalid(
            field_name,
            path,
            format!("Unsupported key container. Allowed extensions: {}", KEY_FILE_EXTENSIONS.join(", ")),
        )),
    }
}

pub fn validate_positive_number<T>(field_name: &str, value: T, min_value: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min_value {
        return Err(invalid(field_name, value, format!("Value must be at least {}", min_value)));
    }
    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| AcquireError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field_name, value, "Value cannot be empty or whitespace-only"));
    }
    Ok(())
}

/// 未被替換的 `${VAR}` 代表環境變數沒設定
pub fn validate_substituted(field_name: &str, value: &str) -> Result<()> {
    if value.contains("${") {
        return Err(AcquireError::ConfigValidationError {
            field: field_name.to_string(),
            message: format!("environment variable in '{}' is not set", value),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(field_name, value, format!("Value must be between {} and {}", min, max)));
    }
    Ok(())
}

/// 秒數落在區間內，並轉成可與時間戳相加的 `chrono::Duration`
pub fn validate_seconds(field_name: &str, seconds: u64, min: u64, max: u64) -> Result<chrono::Duration> {
    validate_range(field_name, seconds, min, max)?;
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| invalid(field_name, seconds, "Value is out of the representable time range"))
}

/// 隨機延遲的上限不得超過 `ceiling`
pub fn validate_delay_bounds(field_name: &str, bounds: &DelayBounds, ceiling: Duration) -> Result<()> {
    if bounds.max() > ceiling {
        return Err(invalid(
            field_name,
            format!("[{}, {}]", bounds.min().as_secs_f64(), bounds.max().as_secs_f64()),
            format!("Upper bound must not exceed {} seconds", ceiling.as_secs()),
        ));
    }
    Ok(())
}
