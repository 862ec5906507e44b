//! Regulatory report tables read from the core-banking schema.
//!
//! Both tables are polled on `CREATEDDATE`, a native DB2 `TIMESTAMP`.
//! `reportingDate` is day-first `DDMMYYYYHHMM` text and does not sort
//! chronologically, so it is only ever a transformed field and key part.

use regsync_types::cursor::CursorKind;

use super::mapped::{FieldSpec, TableSpec};

pub static PERSONAL_DATA_INDIVIDUALS: TableSpec = TableSpec {
    source: "PERSONAL_DATA_INDIVIDUALS",
    destination: "bot_personal_data_individuals",
    ordering: "createdDate",
    cursor_kind: CursorKind::Timestamp,
    fields: &[
        FieldSpec::report_date("reportingDate"),
        FieldSpec::text("customerIdentificationNumber", 50),
        FieldSpec::text("firstName", 100),
        FieldSpec::text("middleNames", 100),
        FieldSpec::text("surname", 100),
        FieldSpec::text("gender", 50),
        FieldSpec::report_date("dateOfBirth"),
        FieldSpec::text("maritalStatus", 50),
        FieldSpec::integer("numberOfDependants"),
        FieldSpec::text("disabilityStatus", 50),
        FieldSpec::text("disabilityType", 50),
        FieldSpec::text("citizenship", 50),
        FieldSpec::text("nationality", 50),
        FieldSpec::text("residence", 50),
        FieldSpec::text("residenceStatus", 50),
        FieldSpec::text("employmentStatus", 50),
        FieldSpec::text("occupation", 50),
        FieldSpec::text("employerName", 100),
        FieldSpec::text("employerAddress", 200),
        FieldSpec::text("sectorEmployer", 50),
        FieldSpec::text("incomeRange", 50),
        FieldSpec::text("educationLevel", 50),
        FieldSpec::text("identificationType", 50),
        FieldSpec::text("identificationNumber", 50),
        FieldSpec::text("issuingCountry", 50),
        FieldSpec::text("issuingAuthority", 100),
        FieldSpec::report_date("issueDate"),
        FieldSpec::report_date("expiryDate"),
        FieldSpec::text("mobileNumber", 50),
        FieldSpec::text("altMobileNumber", 50),
        FieldSpec::text("emailAddress", 100),
        FieldSpec::text("altEmailAddress", 100),
        FieldSpec::text("postalAddress", 200),
        FieldSpec::text("physicalAddress", 200),
        FieldSpec::text("region", 50),
        FieldSpec::text("district", 50),
        FieldSpec::text("ward", 50),
        FieldSpec::text("street", 100),
        FieldSpec::text("houseNumber", 50),
        FieldSpec::text("postalCode", 50),
        FieldSpec::text("country", 50),
        FieldSpec::text("gpsCoordinates", 50),
        FieldSpec::text("nextOfKinName", 100),
        FieldSpec::text("nextOfKinRelationship", 50),
        FieldSpec::text("nextOfKinMobileNumber", 50),
        FieldSpec::text("nextOfKinEmailAddress", 100),
        FieldSpec::text("nextOfKinAddress", 200),
        FieldSpec::text("nextOfKinRegion", 50),
        FieldSpec::text("nextOfKinDistrict", 50),
        FieldSpec::text("nextOfKinWard", 50),
        FieldSpec::text("nextOfKinStreet", 100),
        FieldSpec::text("nextOfKinHouseNumber", 50),
        FieldSpec::text("nextOfKinPostalCode", 50),
        FieldSpec::text("nextOfKinCountry", 50),
        FieldSpec::text("nextOfKinGpsCoordinates", 50),
        FieldSpec::text("kycStatus", 50),
        FieldSpec::report_date("kycDate"),
        FieldSpec::report_date("kycExpiryDate"),
        FieldSpec::text("riskRating", 50),
        FieldSpec::report_date("riskRatingDate"),
        FieldSpec::text("pepStatus", 50),
        FieldSpec::text("pepClassification", 50),
        FieldSpec::text("pepPosition", 100),
        FieldSpec::text("pepCountry", 50),
        FieldSpec::text("pepRelationship", 50),
        FieldSpec::flag("sanctionsStatus"),
        FieldSpec::text("sanctionsList", 100),
        FieldSpec::report_date("sanctionsDate"),
        FieldSpec::text("sanctionsCountry", 50),
        FieldSpec::text("village", 50),
    ],
    natural_key: &["customerIdentificationNumber", "reportingDate"],
    required: &["reportingDate", "customerIdentificationNumber"],
    indexed: &["reportingDate"],
};

pub static ASSET_OWNED_OR_ACQUIRED: TableSpec = TableSpec {
    source: "ASSET_OWNED_OR_ACQUIRED",
    destination: "bot_asset_owned_or_acquired",
    ordering: "createdDate",
    cursor_kind: CursorKind::Timestamp,
    fields: &[
        FieldSpec::report_date("reportingDate"),
        FieldSpec::text("assetCategory", 50),
        FieldSpec::text("assetType", 50),
        FieldSpec::report_date("acquisitionDate"),
        FieldSpec::text("currency", 50),
        FieldSpec::money("orgCostValue"),
        FieldSpec::money("usdCostValue"),
        FieldSpec::money("tzsCostValue"),
        FieldSpec::money("allowanceProbableLoss"),
        FieldSpec::money("botProvision"),
    ],
    natural_key: &["assetCategory", "reportingDate"],
    required: &["reportingDate", "assetCategory"],
    indexed: &["reportingDate"],
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{MappedTable, TableHandler};
    use chrono::NaiveDate;
    use regsync_types::connector::Dialect;
    use regsync_types::cursor::CursorValue;
    use regsync_types::record::{FieldValue, RawRow};
    use regsync_types::schema::SqlType;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn personal_data_projection_matches_source_columns() {
        let table = MappedTable::from_spec(&PERSONAL_DATA_INDIVIDUALS);
        let cols = table.projection().unwrap();
        assert_eq!(cols.len(), 71);
        assert_eq!(cols[0], "REPORTINGDATE");
        assert_eq!(cols[1], "CUSTOMERIDENTIFICATIONNUMBER");
        assert!(cols.contains(&"NEXTOFKINGPSCOORDINATES"));
        assert_eq!(cols[69], "VILLAGE");
        assert_eq!(cols[70], "CREATEDDATE");
    }

    #[test]
    fn report_tables_poll_on_created_timestamp() {
        for spec in [&PERSONAL_DATA_INDIVIDUALS, &ASSET_OWNED_OR_ACQUIRED] {
            let table = MappedTable::from_spec(spec);
            let query = table.query(
                Dialect::Db2,
                "CBS_SCHEMA",
                &CursorValue::epoch(CursorKind::Timestamp),
                1000,
            );
            assert!(
                query.sql.contains(&format!(
                    "FROM CBS_SCHEMA.{} WHERE CREATEDDATE > CAST(? AS TIMESTAMP) \
                     ORDER BY CREATEDDATE FETCH FIRST 1000 ROWS ONLY",
                    spec.source
                )),
                "{}",
                query.sql
            );
            assert_eq!(query.cursor.encode(), "1900-01-01-00.00.00.000000");
            assert_eq!(table.destination().indexed, vec!["reporting_date"]);
        }
    }

    #[test]
    fn personal_data_transform() {
        let table = MappedTable::from_spec(&PERSONAL_DATA_INDIVIDUALS);
        let row = RawRow::new()
            .with("REPORTINGDATE", "010320231430")
            .with("CUSTOMERIDENTIFICATIONNUMBER", "CUST-001")
            .with("FIRSTNAME", "Asha")
            .with("DATEOFBIRTH", "bad-data")
            .with("ISSUEDATE", "010320231430")
            .with("KYCEXPIRYDATE", "31122025")
            .with("SANCTIONSDATE", "150620240900")
            .with("NUMBEROFDEPENDANTS", "3")
            .with("SANCTIONSSTATUS", "Y")
            .with("CREATEDDATE", "2024-06-15-09.00.00.000000");
        let rec = table.transform(&row).unwrap();

        assert_eq!(rec.get("reporting_date"), &FieldValue::Timestamp(ts(2023, 3, 1, 14, 30)));
        assert_eq!(rec.get("date_of_birth"), &FieldValue::Null);
        assert_eq!(rec.get("issue_date"), &FieldValue::Timestamp(ts(2023, 3, 1, 14, 30)));
        assert_eq!(rec.get("kyc_expiry_date"), &FieldValue::Null);
        assert_eq!(rec.get("sanctions_date"), &FieldValue::Timestamp(ts(2024, 6, 15, 9, 0)));
        assert_eq!(rec.get("first_name"), &FieldValue::Text("Asha".into()));
        assert_eq!(rec.get("number_of_dependants"), &FieldValue::Int(3));
        assert_eq!(rec.get("sanctions_status"), &FieldValue::Bool(true));
        assert_eq!(rec.get("surname"), &FieldValue::Null);
        assert_eq!(rec.ordering.encode(), "2024-06-15-09.00.00.000000");
        assert_eq!(
            rec.get("source_timestamp"),
            &FieldValue::Text("2024-06-15-09.00.00.000000".into())
        );
    }

    #[test]
    fn personal_data_dates_are_timestamp_columns() {
        let table = MappedTable::from_spec(&PERSONAL_DATA_INDIVIDUALS);
        let dest = table.destination();
        for col in [
            "date_of_birth",
            "issue_date",
            "expiry_date",
            "kyc_date",
            "kyc_expiry_date",
            "risk_rating_date",
            "sanctions_date",
        ] {
            assert_eq!(dest.column(col).unwrap().sql_type, SqlType::Timestamp, "{col}");
        }
    }

    #[test]
    fn row_without_created_date_is_dropped() {
        let table = MappedTable::from_spec(&ASSET_OWNED_OR_ACQUIRED);
        let row = RawRow::new()
            .with("REPORTINGDATE", "150620240900")
            .with("ASSETCATEGORY", "A1");
        let err = table.transform(&row).unwrap_err();
        assert!(err.to_string().contains("CREATEDDATE"), "{err}");
    }

    #[test]
    fn personal_data_without_customer_id_is_dropped() {
        let table = MappedTable::from_spec(&PERSONAL_DATA_INDIVIDUALS);
        let row = RawRow::new()
            .with("REPORTINGDATE", "010320231430")
            .with("CREATEDDATE", "2024-06-15-09.00.00.000000");
        let err = table.transform(&row).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("customer_identification_number"));
    }

    #[test]
    fn asset_amounts_default_to_zero() {
        let table = MappedTable::from_spec(&ASSET_OWNED_OR_ACQUIRED);
        let row = RawRow::new()
            .with("REPORTINGDATE", "150620240900")
            .with("ASSETCATEGORY", "A1")
            .with("ACQUISITIONDATE", "bad-data")
            .with("ORGCOSTVALUE", "12.5")
            .with("USDCOSTVALUE", "abc")
            .with("CREATEDDATE", "2024-06-15 09:00:00.000000");
        let rec = table.transform(&row).unwrap();
        assert_eq!(rec.get("org_cost_value"), &FieldValue::Float(12.5));
        assert_eq!(rec.get("usd_cost_value"), &FieldValue::Float(0.0));
        assert_eq!(rec.get("tzs_cost_value"), &FieldValue::Float(0.0));
        assert_eq!(rec.get("acquisition_date"), &FieldValue::Null);
        assert_eq!(rec.ordering.encode(), "2024-06-15-09.00.00.000000");
    }

    #[test]
    fn asset_natural_key() {
        let table = MappedTable::from_spec(&ASSET_OWNED_OR_ACQUIRED);
        assert_eq!(
            table.destination().natural_key,
            vec!["asset_category", "reporting_date"]
        );
        assert!(!table.destination().column("reporting_date").unwrap().nullable);
        assert_eq!(
            table.destination().column("asset_category").unwrap().sql_type,
            SqlType::Varchar(50)
        );
        assert_eq!(
            table.destination().column("tzs_cost_value").unwrap().sql_type,
            SqlType::Numeric
        );
    }
}
