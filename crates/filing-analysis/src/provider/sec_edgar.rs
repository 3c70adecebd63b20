//! SEC EDGAR filing provider
//!
//! Statements are assembled from the XBRL company-facts API: every fact
//! reported under the accession number of the latest filing of the requested
//! form is placed into a fixed presentation template per statement.
//!
//! Rate limit: 10 requests per second (SEC fair access policy)
//! User-Agent requirement: must include an application name and contact email

use super::{FilingProvider, FilingRef, RawFiling, RawStatementTable};
use crate::error::ProviderError;
use crate::model::{CalculationRelation, FilingType, StatementKind};
use async_trait::async_trait;
use cached::{Cached, TimedCache};
use chrono::NaiveDate;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

const SEC_BASE_URL: &str = "https://data.sec.gov";
const SEC_COMPANY_TICKERS_URL: &str = "https://www.sec.gov/files/company_tickers.json";
const DIRECTORY_KEY: &str = "company_tickers";
const DIRECTORY_TTL_SECS: u64 = 24 * 60 * 60;
const SEC_REQUESTS_PER_SECOND: u32 = 10;

/// Days two durations may differ and still count as the same period length
const DURATION_SLACK_DAYS: i64 = 20;

/// Legal-form suffixes ignored when matching company names
const NAME_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "corp", "corporation", "co", "company", "ltd", "limited", "plc", "llc",
    "holdings", "sa", "nv", "ag",
];

/// A row of a statement presentation template
struct TemplateRow {
    concept: &'static str,
    level: u8,
}

const fn row(concept: &'static str, level: u8) -> TemplateRow {
    TemplateRow { concept, level }
}

const BALANCE_SHEET_TEMPLATE: &[TemplateRow] = &[
    row("CashAndCashEquivalentsAtCarryingValue", 2),
    row("ShortTermInvestments", 2),
    row("MarketableSecuritiesCurrent", 2),
    row("AccountsReceivableNetCurrent", 2),
    row("InventoryNet", 2),
    row("PrepaidExpenseAndOtherAssetsCurrent", 2),
    row("OtherAssetsCurrent", 2),
    row("AssetsCurrent", 1),
    row("OperatingLeaseRightOfUseAsset", 2),
    row("PropertyPlantAndEquipmentNet", 2),
    row("MarketableSecuritiesNoncurrent", 2),
    row("Goodwill", 2),
    row("IntangibleAssetsNetExcludingGoodwill", 2),
    row("DeferredIncomeTaxAssetsNet", 2),
    row("OtherAssetsNoncurrent", 2),
    row("Assets", 0),
    row("AccountsPayableCurrent", 2),
    row("AccruedLiabilitiesCurrent", 2),
    row("ContractWithCustomerLiabilityCurrent", 2),
    row("LongTermDebtCurrent", 2),
    row("OperatingLeaseLiabilityCurrent", 2),
    row("OtherLiabilitiesCurrent", 2),
    row("LiabilitiesCurrent", 1),
    row("LongTermDebtNoncurrent", 2),
    row("OperatingLeaseLiabilityNoncurrent", 2),
    row("ContractWithCustomerLiabilityNoncurrent", 2),
    row("OtherLiabilitiesNoncurrent", 2),
    row("Liabilities", 0),
    row("RedeemableNoncontrollingInterestEquityCarryingAmount", 0),
    row("PreferredStockValue", 2),
    row("CommonStockValue", 2),
    row("AdditionalPaidInCapital", 2),
    row("AccumulatedOtherComprehensiveIncomeLossNetOfTax", 2),
    row("RetainedEarningsAccumulatedDeficit", 2),
    row("TreasuryStockValue", 2),
    row("StockholdersEquity", 1),
    row("MinorityInterest", 1),
    row("StockholdersEquityIncludingPortionAttributableToNoncontrollingInterest", 0),
    row("LiabilitiesAndStockholdersEquity", 0),
];

const INCOME_STATEMENT_TEMPLATE: &[TemplateRow] = &[
    row("Revenues", 1),
    row("RevenueFromContractWithCustomerExcludingAssessedTax", 1),
    row("CostOfRevenue", 1),
    row("CostOfGoodsAndServicesSold", 1),
    row("GrossProfit", 0),
    row("ResearchAndDevelopmentExpense", 2),
    row("SellingGeneralAndAdministrativeExpense", 2),
    row("RestructuringCharges", 2),
    row("OperatingExpenses", 1),
    row("OperatingIncomeLoss", 0),
    row("InvestmentIncomeInterest", 2),
    row("InterestExpense", 2),
    row("InterestExpenseNonoperating", 2),
    row("OtherNonoperatingIncomeExpense", 2),
    row("IncomeLossFromContinuingOperationsBeforeIncomeTaxesExtraordinaryItemsNoncontrollingInterest", 1),
    row("IncomeTaxExpenseBenefit", 1),
    row("ProfitLoss", 1),
    row("NetIncomeLossAttributableToNoncontrollingInterest", 2),
    row("NetIncomeLoss", 0),
    row("EarningsPerShareBasic", 1),
    row("EarningsPerShareDiluted", 1),
    row("WeightedAverageNumberOfSharesOutstandingBasic", 1),
    row("WeightedAverageNumberOfDilutedSharesOutstanding", 1),
];

const CASH_FLOW_TEMPLATE: &[TemplateRow] = &[
    row("ProfitLoss", 1),
    row("NetIncomeLoss", 1),
    row("DepreciationDepletionAndAmortization", 2),
    row("ShareBasedCompensation", 2),
    row("DeferredIncomeTaxExpenseBenefit", 2),
    row("IncreaseDecreaseInAccountsReceivable", 2),
    row("IncreaseDecreaseInInventories", 2),
    row("IncreaseDecreaseInAccountsPayable", 2),
    row("IncreaseDecreaseInOtherOperatingLiabilities", 2),
    row("NetCashProvidedByUsedInOperatingActivities", 0),
    row("PaymentsToAcquirePropertyPlantAndEquipment", 2),
    row("PaymentsToAcquireInvestments", 2),
    row("ProceedsFromSaleMaturityAndCollectionsOfInvestments", 2),
    row("PaymentsToAcquireBusinessesNetOfCashAcquired", 2),
    row("NetCashProvidedByUsedInInvestingActivities", 0),
    row("ProceedsFromIssuanceOfLongTermDebt", 2),
    row("RepaymentsOfLongTermDebt", 2),
    row("PaymentsForRepurchaseOfCommonStock", 2),
    row("PaymentsOfDividends", 2),
    row("ProceedsFromStockOptionsExercised", 2),
    row("NetCashProvidedByUsedInFinancingActivities", 0),
    row("EffectOfExchangeRateOnCashCashEquivalentsRestrictedCashAndRestrictedCashEquivalents", 1),
    row("CashCashEquivalentsRestrictedCashAndRestrictedCashEquivalentsPeriodIncreaseDecreaseIncludingExchangeRateEffect", 0),
];

fn template(kind: StatementKind) -> &'static [TemplateRow] {
    match kind {
        StatementKind::BalanceSheet => BALANCE_SHEET_TEMPLATE,
        StatementKind::IncomeStatement => INCOME_STATEMENT_TEMPLATE,
        StatementKind::CashFlow => CASH_FLOW_TEMPLATE,
    }
}

/// Company entry of the SEC ticker directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyInfo {
    /// Central Index Key (CIK)
    pub cik: u64,
    pub ticker: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    cik_str: u64,
    ticker: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct CompanyFacts {
    facts: FactGroups,
}

#[derive(Debug, Deserialize)]
struct FactGroups {
    #[serde(rename = "us-gaap", default)]
    us_gaap: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct FactEntry {
    start: Option<NaiveDate>,
    end: NaiveDate,
    val: f64,
    accn: String,
    form: Option<String>,
    filed: NaiveDate,
}

impl FactEntry {
    fn duration_days(&self) -> Option<i64> {
        self.start.map(|start| (self.end - start).num_days())
    }
}

#[derive(Debug, Deserialize)]
struct CompanySubmissions {
    filings: SubmissionFilings,
}

#[derive(Debug, Deserialize)]
struct SubmissionFilings {
    recent: RecentFilings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentFilings {
    accession_number: Vec<String>,
    filing_date: Vec<String>,
    #[serde(default)]
    report_date: Vec<Option<String>>,
    form: Vec<String>,
    primary_document: Vec<String>,
    #[serde(default)]
    primary_doc_description: Vec<Option<String>>,
}

/// SEC EDGAR implementation of [`FilingProvider`]
pub struct SecEdgarProvider {
    client: Client,
    user_agent: String,
    rate_limiter: SharedRateLimiter,
    base_url: String,
    tickers_url: String,
    directory: Mutex<TimedCache<&'static str, Arc<Vec<CompanyInfo>>>>,
}

impl SecEdgarProvider {
    /// Create a provider identifying itself with `user_agent`
    ///
    /// # Example
    /// ```ignore
    /// let provider = SecEdgarProvider::new("filing-analysis (ops@example.com)");
    /// ```
    pub fn new(user_agent: impl Into<String>) -> Self {
        let per_second = NonZeroU32::new(SEC_REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Self {
            client: Client::new(),
            user_agent: user_agent.into(),
            rate_limiter,
            base_url: SEC_BASE_URL.to_string(),
            tickers_url: SEC_COMPANY_TICKERS_URL.to_string(),
            directory: Mutex::new(TimedCache::with_lifespan(std::time::Duration::from_secs(
                DIRECTORY_TTL_SECS,
            ))),
        }
    }

    /// Point the provider at a mirror of the EDGAR endpoints
    pub fn with_base_urls(mut self, base_url: impl Into<String>, tickers_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self.tickers_url = tickers_url.into();
        self
    }

    /// GET a JSON document; `None` on 404
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, ProviderError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ProviderError::ProviderUnavailable(format!(
                "SEC API error: {} for {url}",
                response.status()
            )));
        }

        response.json().await.map(Some).map_err(|e| {
            ProviderError::ProviderUnavailable(format!("failed to parse SEC response: {e}"))
        })
    }

    /// The ticker directory, cached for a day
    pub async fn company_directory(&self) -> Result<Arc<Vec<CompanyInfo>>, ProviderError> {
        let mut cache = self.directory.lock().await;
        if let Some(directory) = cache.cache_get(&DIRECTORY_KEY) {
            return Ok(Arc::clone(directory));
        }

        debug!("Fetching SEC company ticker directory");
        let entries: HashMap<String, TickerEntry> = self
            .get_json(&self.tickers_url)
            .await?
            .ok_or_else(|| ProviderError::ProviderUnavailable("ticker directory missing".to_string()))?;

        // Keys are "0", "1", ... in the directory's ranking order.
        let mut ranked: Vec<(usize, TickerEntry)> = entries
            .into_iter()
            .filter_map(|(rank, entry)| rank.parse().ok().map(|rank| (rank, entry)))
            .collect();
        ranked.sort_by_key(|(rank, _)| *rank);

        let directory = Arc::new(
            ranked
                .into_iter()
                .map(|(_, entry)| CompanyInfo {
                    cik: entry.cik_str,
                    ticker: entry.ticker,
                    name: entry.title,
                })
                .collect::<Vec<_>>(),
        );
        let _ = cache.cache_set(DIRECTORY_KEY, Arc::clone(&directory));
        Ok(directory)
    }

    /// Find a company by ticker or name
    pub async fn lookup(&self, company_id: &str) -> Result<Option<CompanyInfo>, ProviderError> {
        let directory = self.company_directory().await?;
        Ok(match_company(&directory, company_id).cloned())
    }

    async fn lookup_required(
        &self,
        company_id: &str,
        filing_type: &str,
    ) -> Result<CompanyInfo, ProviderError> {
        self.lookup(company_id).await?.ok_or_else(|| ProviderError::NotFound {
            company_id: company_id.to_string(),
            filing_type: filing_type.to_string(),
        })
    }
}

#[async_trait]
impl FilingProvider for SecEdgarProvider {
    #[instrument(skip(self), fields(provider = "sec-edgar"))]
    async fn fetch_statements(
        &self,
        company_id: &str,
        filing_type: FilingType,
    ) -> Result<RawFiling, ProviderError> {
        let not_found = || ProviderError::NotFound {
            company_id: company_id.to_string(),
            filing_type: filing_type.to_string(),
        };

        let company = self.lookup_required(company_id, filing_type.as_str()).await?;
        let url = format!(
            "{}/api/xbrl/companyfacts/CIK{:010}.json",
            self.base_url, company.cik
        );
        let facts: CompanyFacts = self.get_json(&url).await?.ok_or_else(not_found)?;

        let filing = assemble_filing(company_id, filing_type, &facts.facts.us_gaap).ok_or_else(not_found)?;
        info!(
            company = %company.name,
            accession = %filing.accession_id,
            filed = %filing.filing_date,
            "Assembled statements from SEC company facts"
        );
        Ok(filing)
    }

    #[instrument(skip(self), fields(provider = "sec-edgar"))]
    async fn recent_filings(
        &self,
        company_id: &str,
        limit: usize,
    ) -> Result<Vec<FilingRef>, ProviderError> {
        let company = self.lookup_required(company_id, "any").await?;
        let url = format!("{}/submissions/CIK{:010}.json", self.base_url, company.cik);
        let submissions: CompanySubmissions =
            self.get_json(&url).await?.ok_or_else(|| ProviderError::NotFound {
                company_id: company_id.to_string(),
                filing_type: "any".to_string(),
            })?;

        let recent = &submissions.filings.recent;
        let count = recent
            .accession_number
            .len()
            .min(recent.form.len())
            .min(recent.filing_date.len())
            .min(recent.primary_document.len())
            .min(limit);

        Ok((0..count)
            .map(|i| FilingRef {
                accession_id: recent.accession_number[i].clone(),
                form_type: recent.form[i].clone(),
                filing_date: recent.filing_date[i].clone(),
                report_date: recent.report_date.get(i).cloned().flatten(),
                primary_document: recent.primary_document[i].clone(),
                description: recent.primary_doc_description.get(i).cloned().flatten(),
            })
            .collect())
    }
}

/// Match by exact ticker, then exact name, then name prefix
fn match_company<'a>(directory: &'a [CompanyInfo], query: &str) -> Option<&'a CompanyInfo> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    if let Some(company) = directory
        .iter()
        .find(|company| company.ticker.eq_ignore_ascii_case(query))
    {
        return Some(company);
    }

    let wanted = normalize_company_name(query);
    if wanted.is_empty() {
        return None;
    }
    directory
        .iter()
        .find(|company| normalize_company_name(&company.name) == wanted)
        .or_else(|| {
            let prefix = format!("{wanted} ");
            directory
                .iter()
                .find(|company| normalize_company_name(&company.name).starts_with(&prefix))
        })
}

fn normalize_company_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '&' { c.to_ascii_lowercase() } else { ' ' })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let keep = words
        .iter()
        .rposition(|word| !NAME_SUFFIXES.contains(word))
        .map_or(0, |last| last + 1);
    words[..keep].join(" ")
}

/// Fact entries of one concept in its first reported monetary/share unit
fn concept_entries(us_gaap: &Map<String, Value>, concept: &str) -> Option<(String, Vec<FactEntry>)> {
    let data = us_gaap.get(concept)?;
    let units = data.get("units")?;
    let entries = ["USD", "USD/shares", "shares"]
        .iter()
        .find_map(|unit| units.get(*unit))
        .and_then(Value::as_array)?;

    let label = data
        .get("label")
        .and_then(Value::as_str)
        .unwrap_or(concept)
        .to_string();
    let entries = entries
        .iter()
        .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
        .collect();
    Some((label, entries))
}

/// Accession and filing date of the latest filing of `form` across the templates
fn latest_filing(us_gaap: &Map<String, Value>, form: &str) -> Option<(String, NaiveDate)> {
    StatementKind::ALL
        .iter()
        .flat_map(|kind| template(*kind))
        .filter_map(|row| concept_entries(us_gaap, row.concept))
        .flat_map(|(_, entries)| entries)
        .filter(|entry| entry.form.as_deref() == Some(form))
        .map(|entry| (entry.filed, entry.accn))
        .max()
        .map(|(filed, accn)| (accn, filed))
}

/// Period of a statement column: an instant or a start/end duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Period {
    start: Option<NaiveDate>,
    end: NaiveDate,
}

impl Period {
    fn of(entry: &FactEntry) -> Self {
        Self {
            start: entry.start,
            end: entry.end,
        }
    }

    fn days(&self) -> Option<i64> {
        self.start.map(|start| (self.end - start).num_days())
    }
}

/// Choose the current and prior period columns of a statement.
///
/// Balance sheets use instants. Flow statements use durations; for the
/// current column the shortest (`prefer_shortest`) or longest duration ending
/// on the latest date wins, and the prior column is the latest earlier period
/// of about the same length.
fn select_periods(entries: &[FactEntry], instant: bool, prefer_shortest: bool) -> Option<(Period, Option<Period>)> {
    let candidates: Vec<&FactEntry> = entries
        .iter()
        .filter(|entry| entry.start.is_none() == instant)
        .collect();

    let latest_end = candidates.iter().map(|entry| entry.end).max()?;

    let current = if instant {
        Period { start: None, end: latest_end }
    } else {
        let ending_latest = candidates.iter().filter(|entry| entry.end == latest_end);
        let chosen = if prefer_shortest {
            ending_latest.min_by_key(|entry| entry.duration_days())
        } else {
            ending_latest.max_by_key(|entry| entry.duration_days())
        }?;
        Period::of(chosen)
    };

    let prior = candidates
        .iter()
        .filter(|entry| entry.end < current.end)
        .filter(|entry| match (entry.duration_days(), current.days()) {
            (Some(days), Some(current_days)) => (days - current_days).abs() <= DURATION_SLACK_DAYS,
            (None, None) => true,
            _ => false,
        })
        .map(|entry| Period::of(entry))
        .max_by_key(|period| period.end);

    Some((current, prior))
}

fn build_table(
    us_gaap: &Map<String, Value>,
    accession: &str,
    kind: StatementKind,
    filing_type: FilingType,
) -> RawStatementTable {
    let rows = template(kind);
    let mut per_concept: Vec<(&TemplateRow, String, Vec<FactEntry>)> = rows
        .iter()
        .filter_map(|row| {
            concept_entries(us_gaap, row.concept).map(|(label, entries)| {
                let in_filing = entries
                    .into_iter()
                    .filter(|entry| entry.accn == accession)
                    .collect::<Vec<_>>();
                (row, label, in_filing)
            })
        })
        .collect();
    per_concept.retain(|(_, _, entries)| !entries.is_empty());

    let all_entries: Vec<FactEntry> = per_concept
        .iter()
        .flat_map(|(_, _, entries)| entries.iter().cloned())
        .collect();

    let instant = kind == StatementKind::BalanceSheet;
    let prefer_shortest = kind == StatementKind::IncomeStatement && filing_type == FilingType::Form10Q;

    let mut table = RawStatementTable::new(kind);
    let Some((current, prior)) = select_periods(&all_entries, instant, prefer_shortest) else {
        return table;
    };

    table
        .metadata
        .insert("currentPeriodEnd".to_string(), json!(current.end.to_string()));
    if let Some(prior) = prior {
        table
            .metadata
            .insert("priorPeriodEnd".to_string(), json!(prior.end.to_string()));
    }

    for (template_row, label, entries) in per_concept {
        let value_for = |period: Period| {
            entries
                .iter()
                .find(|entry| Period::of(entry) == period)
                .map(|entry| entry.val)
        };
        let current_value = value_for(current);
        let prior_value = prior.and_then(value_for);
        if current_value.is_none() && prior_value.is_none() {
            continue;
        }

        let mut row = Map::new();
        row.insert("label".to_string(), json!(label));
        row.insert("concept".to_string(), json!(format!("us-gaap:{}", template_row.concept)));
        row.insert("level".to_string(), json!(template_row.level));
        row.insert("current".to_string(), json!(current_value));
        row.insert("prior".to_string(), json!(prior_value));
        table.rows.push(row);
    }

    table
}

/// Standard calculation relations whose members are all present
fn derive_calculations(tables: &[RawStatementTable]) -> Vec<CalculationRelation> {
    let present: HashSet<String> = tables
        .iter()
        .filter(|table| table.kind == StatementKind::IncomeStatement)
        .flat_map(|table| table.rows.iter())
        .filter_map(|row| row.get("concept").and_then(Value::as_str))
        .map(|concept| concept.trim_start_matches("us-gaap:").to_string())
        .collect();
    let has = |concept: &str| present.contains(concept);
    let first_of = |concepts: &[&'static str]| concepts.iter().copied().find(|c| has(c));

    let mut relations = Vec::new();
    if let (true, Some(revenue), Some(cost)) = (
        has("GrossProfit"),
        first_of(&["Revenues", "RevenueFromContractWithCustomerExcludingAssessedTax"]),
        first_of(&["CostOfRevenue", "CostOfGoodsAndServicesSold"]),
    ) {
        relations.push(
            CalculationRelation::new(StatementKind::IncomeStatement, "GrossProfit")
                .child(revenue, 1.0)
                .child(cost, -1.0),
        );
    }
    if has("OperatingIncomeLoss") && has("GrossProfit") && has("OperatingExpenses") {
        relations.push(
            CalculationRelation::new(StatementKind::IncomeStatement, "OperatingIncomeLoss")
                .child("GrossProfit", 1.0)
                .child("OperatingExpenses", -1.0),
        );
    }
    relations
}

fn assemble_filing(
    company_id: &str,
    filing_type: FilingType,
    us_gaap: &Map<String, Value>,
) -> Option<RawFiling> {
    let (accession_id, filing_date) = latest_filing(us_gaap, filing_type.as_str())?;
    let tables: Vec<RawStatementTable> = StatementKind::ALL
        .iter()
        .map(|kind| build_table(us_gaap, &accession_id, *kind, filing_type))
        .collect();
    let calculations = derive_calculations(&tables);

    Some(RawFiling {
        company_id: company_id.to_string(),
        filing_type,
        filing_date,
        accession_id,
        tables,
        calculations,
    })
}
