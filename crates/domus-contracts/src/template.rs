//! Typed rendering of the rental contract body.
//!
//! Templates use `{{TOKEN}}` placeholders. A template is parsed once into text
//! and token segments; every token must name a [`ContractToken`], so rendering
//! itself cannot fail and cannot leave a placeholder behind.

use std::path::Path;

use chrono::NaiveDate;
use domus_core::{ContractParties, ContractTerms, LifecycleError};
use thiserror::Error;

const CANONICAL_TEMPLATE: &str = include_str!("../templates/rental_contract.txt");

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown placeholder token {0:?}")]
    UnknownToken(String),

    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),

    #[error("failed to read template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<TemplateError> for LifecycleError {
    fn from(err: TemplateError) -> Self {
        LifecycleError::Template(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractToken {
    ClientName,
    OwnerName,
    PropertyAddress,
    StartDate,
    EndDate,
    MonthlyAmount,
    PaymentFrequency,
    GracePeriodDays,
    PenaltyRate,
    NoticePeriodMonths,
    RevisionFrequency,
    RevisionUnit,
    ContractDate,
}

impl ContractToken {
    pub const ALL: [ContractToken; 13] = [
        ContractToken::ClientName,
        ContractToken::OwnerName,
        ContractToken::PropertyAddress,
        ContractToken::StartDate,
        ContractToken::EndDate,
        ContractToken::MonthlyAmount,
        ContractToken::PaymentFrequency,
        ContractToken::GracePeriodDays,
        ContractToken::PenaltyRate,
        ContractToken::NoticePeriodMonths,
        ContractToken::RevisionFrequency,
        ContractToken::RevisionUnit,
        ContractToken::ContractDate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ContractToken::ClientName => "CLIENT_NAME",
            ContractToken::OwnerName => "OWNER_NAME",
            ContractToken::PropertyAddress => "PROPERTY_ADDRESS",
            ContractToken::StartDate => "START_DATE",
            ContractToken::EndDate => "END_DATE",
            ContractToken::MonthlyAmount => "MONTHLY_AMOUNT",
            ContractToken::PaymentFrequency => "PAYMENT_FREQUENCY",
            ContractToken::GracePeriodDays => "GRACE_PERIOD_DAYS",
            ContractToken::PenaltyRate => "PENALTY_RATE",
            ContractToken::NoticePeriodMonths => "NOTICE_PERIOD_MONTHS",
            ContractToken::RevisionFrequency => "REVISION_FREQUENCY",
            ContractToken::RevisionUnit => "REVISION_UNIT",
            ContractToken::ContractDate => "CONTRACT_DATE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|token| token.name() == name)
    }
}

/// Everything a placeholder can resolve to.
#[derive(Debug, Clone, Copy)]
pub struct TemplateValues<'a> {
    pub parties: &'a ContractParties,
    pub terms: &'a ContractTerms,
    pub contract_date: NaiveDate,
}

impl TemplateValues<'_> {
    pub fn resolve(&self, token: ContractToken) -> String {
        match token {
            ContractToken::ClientName => self.parties.client_name.clone(),
            ContractToken::OwnerName => self.parties.owner_name.clone(),
            ContractToken::PropertyAddress => self.parties.property_address.clone(),
            ContractToken::StartDate => format_date(self.terms.start_date),
            ContractToken::EndDate => format_date(self.terms.end_date),
            ContractToken::MonthlyAmount => format!("{:.2}", self.terms.monthly_amount),
            ContractToken::PaymentFrequency => self.terms.payment_frequency.to_string(),
            ContractToken::GracePeriodDays => self.terms.grace_period_days.to_string(),
            ContractToken::PenaltyRate => self.terms.penalty_rate.normalize().to_string(),
            ContractToken::NoticePeriodMonths => self.terms.notice_period_months.to_string(),
            ContractToken::RevisionFrequency => self.terms.revision_frequency.to_string(),
            ContractToken::RevisionUnit => self.terms.revision_unit.to_string(),
            ContractToken::ContractDate => format_date(self.contract_date),
        }
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Token(ContractToken),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractTemplate {
    segments: Vec<Segment>,
}

impl ContractTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("}}") else {
                return Err(TemplateError::Unterminated(offset + open));
            };
            let name = &after_open[..close];
            let token = ContractToken::from_name(name)
                .ok_or_else(|| TemplateError::UnknownToken(name.to_string()))?;
            segments.push(Segment::Token(token));

            let consumed = open + 2 + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// The agency's standard lease.
    pub fn canonical() -> Result<Self, TemplateError> {
        Self::parse(CANONICAL_TEMPLATE)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&source)
    }

    pub fn tokens(&self) -> impl Iterator<Item = ContractToken> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Token(token) => Some(*token),
            Segment::Text(_) => None,
        })
    }

    pub fn render(&self, values: &TemplateValues<'_>) -> String {
        let mut body = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => body.push_str(text),
                Segment::Token(token) => body.push_str(&values.resolve(*token)),
            }
        }
        body
    }
}
