use regex::Regex;
use sql_bridge::{extract, normalize, DatabaseName};

const QUERIES: &[&str] = &[
    "SELECT COUNT(*) FROM Customers",
    "select * from sales.Orders o join dbo.Customers c on c.Id = o.CustomerId",
    "SELECT * FROM [Northwind].[dbo].[Orders]",
    "SELECT * FROM varchar.Customers",
    "SELECT * FROM [datetime].[hr].Staff",
    "SELECT * FROM srv.Other.hr.Staff s LEFT OUTER JOIN Regions r ON r.Id = s.RegionId",
    "SELECT * FROM Customers AS c, Orders o WHERE c.Id = o.CustomerId",
    "SELECT Region, COUNT(*) AS Count\nFROM\n  Customers\nGROUP BY Region\nORDER BY Count DESC",
    "SELECT * FROM Orders WHERE CustomerId IN (SELECT Id FROM Customers WHERE Region = 'FROM x')",
    "SELECT * FROM Sales..Customers",
    "SELECT * FROM [odd]]name] JOIN \"Quoted\".\"Table\" q ON 1 = 1",
    "SELECT * FROM dbo . Customers",
    "SELECT * FROM (Customers c JOIN Orders o ON c.Id = o.CustomerId)",
    "SELECT * FROM Customers (NOLOCK) WHERE Region = 'West'",
    "SELECT * FROM Sales.Customers",
];

fn sales() -> DatabaseName {
    DatabaseName::new("Sales").unwrap()
}

#[test]
fn test_normalize_is_idempotent() {
    let db = sales();
    for query in QUERIES {
        let once = normalize(query, &db);
        let twice = normalize(&once, &db);
        assert_eq!(once, twice, "not idempotent for: {}", query);
    }
}

#[test]
fn test_every_from_and_join_target_is_fully_qualified() {
    let db = sales();
    let target = Regex::new(r"(?i)\b(?:FROM|JOIN)\s+(\S+)").unwrap();
    let qualified = Regex::new(r"^\[Sales\]\.\[(?:[^\]]|\]\])+\]\.\[(?:[^\]]|\]\])+\]$").unwrap();

    for query in QUERIES {
        let normalized = normalize(query, &db);
        // string literals are not table references
        let without_literals = Regex::new(r"'[^']*'").unwrap().replace_all(&normalized, "''");
        for caps in target.captures_iter(&without_literals) {
            let reference = caps[1].trim_start_matches('(').trim_end_matches(',');
            assert!(
                qualified.is_match(reference),
                "unqualified reference {:?} in {:?}",
                reference,
                normalized
            );
        }
    }
}

#[test]
fn test_type_token_defense() {
    assert_eq!(
        normalize("SELECT * FROM varchar.Customers", &sales()),
        "SELECT * FROM [Sales].[dbo].[Customers]"
    );
}

#[test]
fn test_quoted_identifiers_are_rebracketed() {
    assert_eq!(
        normalize("SELECT * FROM \"hr\".\"Staff\"", &sales()),
        "SELECT * FROM [Sales].[hr].[Staff]"
    );
}

#[test]
fn test_extraction_priority_last_fenced_block() {
    let response = "```sql\nSELECT 1\n```\nor better\n```sql\nSELECT 2\n```";
    assert_eq!(extract(response).query.as_deref(), Some("SELECT 2"));
}

#[test]
fn test_refusal_even_with_select_substring() {
    let result = extract("I cannot generate a query for this request.\nSELECT is not the answer here.");
    assert!(result.query.is_none());
    assert!(result.error_reason.map(|r| !r.is_empty()).unwrap_or(false));
}
