//! 电话号码规范化
//! 回调关联键使用 E.164 格式，发送端则要求纯数字

use crate::error::{AppError, Result};

/// 默认地区（法国）国家码，本地格式 0X... 按此补全
const DEFAULT_COUNTRY_CODE: &str = "33";

/// 规范化为 E.164 格式（"+" + 国家码 + 号码）
///
/// 接受的输入：已是国际格式（+33…/0033…）或默认地区本地格式（06…）；
/// 空格、点、横线、括号会被忽略
pub fn normalize_e164(raw: &str) -> Result<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '.' | '-' | '(' | ')'))
        .collect();

    if cleaned.is_empty() {
        return Err(AppError::validation("phone number is empty"));
    }

    let digits = if let Some(rest) = cleaned.strip_prefix('+') {
        rest.to_string()
    } else if let Some(rest) = cleaned.strip_prefix("00") {
        rest.to_string()
    } else if let Some(rest) = cleaned.strip_prefix('0') {
        // 默认地区本地格式
        format!("{}{}", DEFAULT_COUNTRY_CODE, rest)
    } else {
        cleaned.clone()
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::validation(&format!(
            "phone number {} contains invalid characters",
            raw
        )));
    }

    // E.164：最多 15 位，首位不能为 0
    if digits.len() < 8 || digits.len() > 15 || digits.starts_with('0') {
        return Err(AppError::validation(&format!(
            "phone number {} is not a valid E.164 number",
            raw
        )));
    }

    Ok(format!("+{}", digits))
}

/// 发送负载要求纯数字（去掉 "+" 前缀）
pub fn e164_digits(phone_e164: &str) -> &str {
    phone_e164.strip_prefix('+').unwrap_or(phone_e164)
}
