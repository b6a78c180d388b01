//! Routes and element locators of the electronic queue site.

use crate::domain::ports::Locator;
use chrono::NaiveDate;
use url::Url;

pub const FREE_TIMES_PATH: &str = "/site/freetimes";
pub const RESERVE_PATH: &str = "/site/reservecherga";
/// 時段已被別人搶走時的回應內容
pub const ALREADY_TAKEN_SENTINEL: &str = "error01";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    base: Url,
}

impl Site {
    pub fn parse(base_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(base_url)?,
        })
    }

    pub fn home(&self) -> String {
        self.base.to_string()
    }

    /// 相對路徑以站台根目錄解析，絕對 URL 原樣保留
    pub fn resolve(&self, reference: &str) -> String {
        match self.base.join(reference) {
            Ok(url) => url.to_string(),
            Err(_) => reference.to_string(),
        }
    }
}

pub fn terms_checkbox() -> Locator {
    Locator::Css("input[type=checkbox]".to_string())
}

pub fn continue_button() -> Locator {
    Locator::Class("btn-hsc-green_s".to_string())
}

pub fn accept_terms_button() -> Locator {
    Locator::Id("btnAcceptUserDataAgreement".to_string())
}

pub fn bank_id_link() -> Locator {
    Locator::Css("a[href='/bankid-nbu-auth']".to_string())
}

pub fn bank_selector() -> Locator {
    Locator::Id("selBankConnect-button".to_string())
}

pub fn bank_option(bank_name: &str) -> Locator {
    Locator::XPath(format!("//div[contains(text(), '{}')]", bank_name))
}

pub fn bank_choose_button() -> Locator {
    Locator::Id("btnBankIDChoose".to_string())
}

pub fn approval_qr_code() -> Locator {
    Locator::Id("qrcode".to_string())
}

pub fn key_file_link() -> Locator {
    Locator::Css("a[href='/euid-auth-js']".to_string())
}

pub fn key_file_prompt() -> Locator {
    Locator::XPath("//span[text()='оберіть його на своєму носієві']".to_string())
}

pub fn key_file_input() -> Locator {
    Locator::Id("PKeyFileInput".to_string())
}

pub fn key_password_input() -> Locator {
    Locator::Id("PKeyPassword".to_string())
}

pub fn key_sign_button() -> Locator {
    Locator::Id("id-app-login-sign-form-file-key-sign-button".to_string())
}

pub fn confirm_reservation_button() -> Locator {
    Locator::Class("btn-hsc-green".to_string())
}

/// 確認頁上與該日期對應的 PDF 連結
pub fn artifact_link(date: NaiveDate) -> Locator {
    Locator::XPath(format!(
        "//div[.//strong[contains(text(), 'ДАТА {}')]]//a[contains(@href, '/site/mpdf')]",
        date.format("%d.%m.%y")
    ))
}

pub fn recaptcha_frame() -> Locator {
    Locator::XPath("//iframe[@title=\"reCAPTCHA\"]".to_string())
}

pub fn artifact_filename(date: NaiveDate) -> String {
    format!("Talon_{}.pdf", date.format("%Y_%m_%d"))
}
