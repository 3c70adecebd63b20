//! Catalog of the financial concepts the validator and ratio engine look up
//!
//! Each entry lists XBRL concept names in preference order, then display
//! labels used when a provider omits concept ids. Labels are compared against
//! the normalized label, case-insensitively and exactly.

use crate::model::StatementKind::{BalanceSheet, CashFlow, IncomeStatement};
use crate::model::{CompanyFilingSnapshot, LineItem, StatementKind};

/// A named financial concept and how to find it in a statement
#[derive(Debug, Clone, Copy)]
pub struct ConceptRef {
    pub name: &'static str,
    pub statement: StatementKind,
    pub concepts: &'static [&'static str],
    pub labels: &'static [&'static str],
}

impl ConceptRef {
    /// Find the line item, preferring its home statement
    pub fn find<'a>(&self, snapshot: &'a CompanyFilingSnapshot) -> Option<&'a LineItem> {
        let home_kind = self.statement;
        let home = snapshot.statements.get(home_kind);
        let statements = move || {
            home.into_iter().chain(
                snapshot
                    .statements
                    .iter()
                    .filter(move |statement| statement.kind() != home_kind),
            )
        };

        statements()
            .find_map(|statement| statement.find_concept(self.concepts))
            .or_else(|| statements().find_map(|statement| statement.find_label(self.labels)))
    }

    /// Current-period value of the line item
    pub fn current_value(&self, snapshot: &CompanyFilingSnapshot) -> Option<f64> {
        self.find(snapshot).and_then(LineItem::current_value)
    }
}

const fn concept(
    name: &'static str,
    statement: StatementKind,
    concepts: &'static [&'static str],
    labels: &'static [&'static str],
) -> ConceptRef {
    ConceptRef {
        name,
        statement,
        concepts,
        labels,
    }
}

pub const TOTAL_ASSETS: ConceptRef = concept("Total assets", BalanceSheet, &["Assets"], &["total assets"]);

pub const CURRENT_ASSETS: ConceptRef = concept(
    "Current assets",
    BalanceSheet,
    &["AssetsCurrent"],
    &["total current assets", "current assets"],
);

pub const CASH: ConceptRef = concept(
    "Cash and cash equivalents",
    BalanceSheet,
    &["CashAndCashEquivalentsAtCarryingValue", "CashAndDueFromBanks", "Cash"],
    &["cash and cash equivalents", "cash"],
);

pub const RECEIVABLES: ConceptRef = concept(
    "Accounts receivable",
    BalanceSheet,
    &["AccountsReceivableNetCurrent", "ReceivablesNetCurrent"],
    &["accounts receivable, net", "accounts receivable", "receivables, net"],
);

pub const INVENTORY: ConceptRef = concept(
    "Inventory",
    BalanceSheet,
    &["InventoryNet", "InventoryFinishedGoods"],
    &["inventory", "inventories", "inventory, net"],
);

pub const TOTAL_LIABILITIES: ConceptRef = concept(
    "Total liabilities",
    BalanceSheet,
    &["Liabilities"],
    &["total liabilities"],
);

pub const CURRENT_LIABILITIES: ConceptRef = concept(
    "Current liabilities",
    BalanceSheet,
    &["LiabilitiesCurrent"],
    &["total current liabilities", "current liabilities"],
);

pub const STOCKHOLDERS_EQUITY: ConceptRef = concept(
    "Stockholders' equity",
    BalanceSheet,
    &["StockholdersEquity"],
    &[
        "total stockholders' equity",
        "total shareholders' equity",
        "stockholders' equity",
        "shareholders' equity",
    ],
);

pub const EQUITY_INCLUDING_NONCONTROLLING: ConceptRef = concept(
    "Total equity",
    BalanceSheet,
    &["StockholdersEquityIncludingPortionAttributableToNoncontrollingInterest"],
    &["total equity"],
);

pub const MINORITY_INTEREST: ConceptRef = concept(
    "Noncontrolling interests",
    BalanceSheet,
    &["MinorityInterest"],
    &[
        "noncontrolling interests in subsidiaries",
        "noncontrolling interests",
        "noncontrolling interest",
        "minority interest",
    ],
);

pub const REDEEMABLE_NONCONTROLLING: ConceptRef = concept(
    "Redeemable noncontrolling interests",
    BalanceSheet,
    &[
        "RedeemableNoncontrollingInterestEquityCarryingAmount",
        "RedeemableNoncontrollingInterestEquityCommonCarryingAmount",
    ],
    &[
        "redeemable noncontrolling interests in subsidiaries",
        "redeemable noncontrolling interests",
        "redeemable noncontrolling interest",
    ],
);

pub const LIABILITIES_AND_EQUITY: ConceptRef = concept(
    "Total liabilities and equity",
    BalanceSheet,
    &["LiabilitiesAndStockholdersEquity"],
    &[
        "total liabilities and equity",
        "total liabilities and stockholders' equity",
        "total liabilities and shareholders' equity",
    ],
);

pub const REVENUE: ConceptRef = concept(
    "Revenue",
    IncomeStatement,
    &[
        "Revenues",
        "RevenueFromContractWithCustomerExcludingAssessedTax",
        "SalesRevenueNet",
    ],
    &["total revenues", "total revenue", "revenues", "revenue", "net sales"],
);

pub const COST_OF_REVENUE: ConceptRef = concept(
    "Cost of revenue",
    IncomeStatement,
    &["CostOfRevenue", "CostOfGoodsAndServicesSold", "CostOfGoodsSold"],
    &[
        "total cost of revenues",
        "cost of revenues",
        "cost of revenue",
        "cost of sales",
        "cost of goods sold",
    ],
);

pub const GROSS_PROFIT: ConceptRef = concept("Gross profit", IncomeStatement, &["GrossProfit"], &["gross profit"]);

pub const OPERATING_INCOME: ConceptRef = concept(
    "Operating income",
    IncomeStatement,
    &["OperatingIncomeLoss"],
    &[
        "income from operations",
        "income (loss) from operations",
        "operating income",
        "operating income (loss)",
    ],
);

pub const NET_INCOME: ConceptRef = concept(
    "Net income",
    IncomeStatement,
    &["NetIncomeLoss", "NetIncomeLossAvailableToCommonStockholdersBasic", "ProfitLoss"],
    &[
        "net income attributable to common stockholders",
        "net income",
        "net income (loss)",
    ],
);

pub const INTEREST_EXPENSE: ConceptRef = concept(
    "Interest expense",
    IncomeStatement,
    &["InterestExpense", "InterestExpenseNonoperating", "InterestExpenseDebt"],
    &["interest expense"],
);

pub const OPERATING_CASH_FLOW: ConceptRef = concept(
    "Operating cash flow",
    CashFlow,
    &["NetCashProvidedByUsedInOperatingActivities"],
    &[
        "net cash provided by operating activities",
        "net cash provided by (used in) operating activities",
        "cash flows from operating activities",
    ],
);

pub const CAPITAL_EXPENDITURES: ConceptRef = concept(
    "Capital expenditures",
    CashFlow,
    &["PaymentsToAcquirePropertyPlantAndEquipment", "PaymentsToAcquireProductiveAssets"],
    &[
        "capital expenditures",
        "purchases of property and equipment",
        "purchases of property and equipment excluding finance leases, net of sales",
    ],
);
