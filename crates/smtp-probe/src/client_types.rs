use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts for the short-lived dialogues the prober runs. These are
/// deliberately much tighter than an MTA would use: a verification
/// session that stalls is itself a signal, and the whole probe budget
/// has to stay within a few seconds.
#[derive(Serialize, Deserialize, Copy, Clone, Debug)]
pub struct SmtpTimeouts {
    pub connect_timeout: Duration,
    pub greeting_timeout: Duration,
    pub ehlo_timeout: Duration,
    pub mail_from_timeout: Duration,
    pub rcpt_to_timeout: Duration,
    pub starttls_timeout: Duration,
    pub noop_timeout: Duration,
    pub rset_timeout: Duration,
    pub quit_timeout: Duration,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        let standard = Duration::from_secs(5);
        Self {
            connect_timeout: standard,
            greeting_timeout: standard,
            ehlo_timeout: standard,
            mail_from_timeout: standard,
            rcpt_to_timeout: Duration::from_secs(8),
            starttls_timeout: standard,
            noop_timeout: standard,
            rset_timeout: standard,
            quit_timeout: standard,
        }
    }
}

impl SmtpTimeouts {
    /// Timeouts for fast-mode probing.
    pub fn short() -> Self {
        let short = Duration::from_secs(3);
        Self {
            connect_timeout: short,
            greeting_timeout: short,
            ehlo_timeout: short,
            mail_from_timeout: short,
            rcpt_to_timeout: short,
            starttls_timeout: short,
            noop_timeout: short,
            rset_timeout: short,
            quit_timeout: short,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    StartTls,
    Noop,
    Rset,
    Quit,
}

impl Command {
    pub fn encode(&self) -> String {
        match self {
            Self::Ehlo(domain) => format!("EHLO {domain}\r\n"),
            Self::Helo(domain) => format!("HELO {domain}\r\n"),
            Self::MailFrom(address) => format!("MAIL FROM:<{address}>\r\n"),
            Self::RcptTo(address) => format!("RCPT TO:<{address}>\r\n"),
            Self::StartTls => "STARTTLS\r\n".to_string(),
            Self::Noop => "NOOP\r\n".to_string(),
            Self::Rset => "RSET\r\n".to_string(),
            Self::Quit => "QUIT\r\n".to_string(),
        }
    }

    pub fn client_timeout(&self, timeouts: &SmtpTimeouts) -> Duration {
        match self {
            Self::Ehlo(_) | Self::Helo(_) => timeouts.ehlo_timeout,
            Self::MailFrom(_) => timeouts.mail_from_timeout,
            Self::RcptTo(_) => timeouts.rcpt_to_timeout,
            Self::StartTls => timeouts.starttls_timeout,
            Self::Noop => timeouts.noop_timeout,
            Self::Rset => timeouts.rset_timeout,
            Self::Quit => timeouts.quit_timeout,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Hash)]
pub struct Response {
    pub code: u16,
    pub enhanced_code: Option<EnhancedStatusCode>,
    #[serde(serialize_with = "as_single_line")]
    pub content: String,
    pub command: Option<String>,
}

impl Response {
    pub fn to_single_line(&self) -> String {
        let mut line = format!("{} ", self.code);

        if let Some(enh) = &self.enhanced_code {
            line.push_str(&format!("{}.{}.{} ", enh.class, enh.subject, enh.detail));
        }

        line.push_str(&remove_line_break(&self.content));

        line
    }

    pub fn is_transient(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    pub fn is_permanent(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    pub fn is_positive(&self) -> bool {
        self.code >= 200 && self.code < 300
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Hash)]
pub struct EnhancedStatusCode {
    pub class: u8,
    pub subject: u16,
    pub detail: u16,
}

fn parse_enhanced_code(content: &str) -> Option<(EnhancedStatusCode, &str)> {
    let mut fields = content.splitn(2, ' ');
    let candidate = fields.next()?;
    let remainder = fields.next().unwrap_or("");

    let mut parts = candidate.split('.');
    let class = parts.next()?.parse::<u8>().ok()?;
    let subject = parts.next()?.parse::<u16>().ok()?;
    let detail = parts.next()?.parse::<u16>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((
        EnhancedStatusCode {
            class,
            subject,
            detail,
        },
        remainder,
    ))
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ResponseLine<'a> {
    pub code: u16,
    pub is_final: bool,
    pub content: &'a str,
}

impl ResponseLine<'_> {
    fn reconstruct(&self) -> String {
        format!(
            "{}{}{}",
            self.code,
            if self.is_final { ' ' } else { '-' },
            self.content
        )
    }
}

/// Accumulates the lines of a (possibly multi-line) response.
/// The enhanced status code of the first line, if any, is factored
/// out of the content; subsequent lines shed their copy of it only
/// when it matches the first line's.
pub struct ResponseBuilder {
    code: u16,
    enhanced_code: Option<EnhancedStatusCode>,
    content: String,
}

impl ResponseBuilder {
    pub fn new(line: &ResponseLine) -> Self {
        let (enhanced_code, content) = match parse_enhanced_code(line.content) {
            Some((enh, remainder)) => (Some(enh), remainder.to_string()),
            None => (None, line.content.to_string()),
        };
        Self {
            code: line.code,
            enhanced_code,
            content,
        }
    }

    pub fn add_line(&mut self, line: &ResponseLine) -> Result<(), String> {
        if line.code != self.code {
            return Err(line.reconstruct());
        }
        self.content.push('\n');
        match (self.enhanced_code, parse_enhanced_code(line.content)) {
            (Some(mine), Some((theirs, remainder))) if mine == theirs => {
                self.content.push_str(remainder);
            }
            _ => self.content.push_str(line.content),
        }
        Ok(())
    }

    pub fn build(self, command: Option<String>) -> Response {
        Response {
            code: self.code,
            enhanced_code: self.enhanced_code,
            content: self.content,
            command,
        }
    }
}

fn remove_line_break(line: &String) -> String {
    let mut new_line = String::new();
    let mut cr_to_space = false;

    for c in line.chars() {
        match c {
            '\r' => {
                new_line.push(' ');
                cr_to_space = true;
            }
            '\n' => {
                if !cr_to_space {
                    new_line.push(' ');
                } else {
                    cr_to_space = false;
                }
            }
            c => new_line.push(c),
        }
    }
    new_line
}

fn as_single_line<S>(content: &String, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&remove_line_break(content))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_encoding() {
        assert_eq!(Command::Ehlo("probe.example".into()).encode(), "EHLO probe.example\r\n");
        assert_eq!(
            Command::MailFrom("verify@probe.example".into()).encode(),
            "MAIL FROM:<verify@probe.example>\r\n"
        );
        assert_eq!(
            Command::RcptTo("user@example.com".into()).encode(),
            "RCPT TO:<user@example.com>\r\n"
        );
        assert_eq!(Command::Quit.encode(), "QUIT\r\n");
    }

    #[test]
    fn enhanced_code_parsing() {
        let (enh, rest) = parse_enhanced_code("5.1.1 User unknown").unwrap();
        assert_eq!(
            enh,
            EnhancedStatusCode {
                class: 5,
                subject: 1,
                detail: 1
            }
        );
        assert_eq!(rest, "User unknown");

        assert!(parse_enhanced_code("ok 2.0.0").is_none());
        assert!(parse_enhanced_code("2.0 missing detail").is_none());
    }

    #[test]
    fn response_classification() {
        let resp = Response {
            code: 451,
            enhanced_code: None,
            content: "try again later".to_string(),
            command: None,
        };
        assert!(resp.is_transient());
        assert!(!resp.is_permanent());
        assert!(!resp.is_positive());
    }
}
