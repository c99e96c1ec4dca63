use orbit_common::{account::Allowance, host::HostSettings};

// Price gouging checks against the per-renter ceilings.
//
// There are two deliberately different thresholds. At form time a host
// is rejected only when a ceiling is strictly below its quote. For
// payment contracts the same ceilings reject on less-or-equal, and the
// sector access price is checked as well. A ceiling of zero is treated
// as unset.

pub fn check_form_gouging(allowance: &Allowance, settings: &HostSettings) -> Result<(), String> {
    if !allowance.max_rpc_price.is_zero() && allowance.max_rpc_price < settings.base_rpc_price {
        return Err(format!(
            "rpc price {} exceeds the ceiling {}",
            settings.base_rpc_price, allowance.max_rpc_price
        ));
    }
    if !allowance.max_contract_price.is_zero()
        && allowance.max_contract_price < settings.contract_price
    {
        return Err(format!(
            "contract price {} exceeds the ceiling {}",
            settings.contract_price, allowance.max_contract_price
        ));
    }
    if !allowance.max_storage_price.is_zero()
        && allowance.max_storage_price < settings.storage_price
    {
        return Err(format!(
            "storage price {} exceeds the ceiling {}",
            settings.storage_price, allowance.max_storage_price
        ));
    }
    if !allowance.max_upload_price.is_zero() && allowance.max_upload_price < settings.upload_price {
        return Err(format!(
            "upload price {} exceeds the ceiling {}",
            settings.upload_price, allowance.max_upload_price
        ));
    }
    if !allowance.max_download_price.is_zero()
        && allowance.max_download_price < settings.download_price
    {
        return Err(format!(
            "download price {} exceeds the ceiling {}",
            settings.download_price, allowance.max_download_price
        ));
    }
    Ok(())
}

pub fn check_payment_gouging(allowance: &Allowance, settings: &HostSettings) -> Result<(), String> {
    if !allowance.max_rpc_price.is_zero() && allowance.max_rpc_price <= settings.base_rpc_price {
        return Err(format!(
            "rpc price {} reaches the ceiling {}",
            settings.base_rpc_price, allowance.max_rpc_price
        ));
    }
    if !allowance.max_contract_price.is_zero()
        && allowance.max_contract_price <= settings.contract_price
    {
        return Err(format!(
            "contract price {} reaches the ceiling {}",
            settings.contract_price, allowance.max_contract_price
        ));
    }
    if !allowance.max_storage_price.is_zero()
        && allowance.max_storage_price <= settings.storage_price
    {
        return Err(format!(
            "storage price {} reaches the ceiling {}",
            settings.storage_price, allowance.max_storage_price
        ));
    }
    if !allowance.max_upload_price.is_zero() && allowance.max_upload_price <= settings.upload_price
    {
        return Err(format!(
            "upload price {} reaches the ceiling {}",
            settings.upload_price, allowance.max_upload_price
        ));
    }
    if !allowance.max_download_price.is_zero()
        && allowance.max_download_price <= settings.download_price
    {
        return Err(format!(
            "download price {} reaches the ceiling {}",
            settings.download_price, allowance.max_download_price
        ));
    }
    if !allowance.max_sector_access_price.is_zero()
        && allowance.max_sector_access_price <= settings.sector_access_price
    {
        return Err(format!(
            "sector access price {} reaches the ceiling {}",
            settings.sector_access_price, allowance.max_sector_access_price
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_common::currency::Currency;

    fn allowance() -> Allowance {
        Allowance {
            max_rpc_price: Currency::from(10u64),
            max_contract_price: Currency::from(100u64),
            max_storage_price: Currency::from(5u64),
            max_upload_price: Currency::from(3u64),
            max_download_price: Currency::from(4u64),
            max_sector_access_price: Currency::from(2u64),
            ..Default::default()
        }
    }

    fn settings_below_ceilings() -> HostSettings {
        HostSettings {
            base_rpc_price: Currency::from(9u64),
            contract_price: Currency::from(99u64),
            storage_price: Currency::from(4u64),
            upload_price: Currency::from(2u64),
            download_price: Currency::from(3u64),
            sector_access_price: Currency::from(1u64),
            ..Default::default()
        }
    }

    #[test]
    fn test_form_accepts_below_every_ceiling() {
        assert!(check_form_gouging(&allowance(), &settings_below_ceilings()).is_ok());
    }

    #[test]
    fn test_form_rejects_each_raised_price() {
        let allowance = allowance();
        let raises: Vec<fn(&mut HostSettings)> = vec![
            |s| s.base_rpc_price = Currency::from(11u64),
            |s| s.contract_price = Currency::from(101u64),
            |s| s.storage_price = Currency::from(6u64),
            |s| s.upload_price = Currency::from(4u64),
            |s| s.download_price = Currency::from(5u64),
        ];
        for raise in raises {
            let mut settings = settings_below_ceilings();
            raise(&mut settings);
            assert!(
                check_form_gouging(&allowance, &settings).is_err(),
                "raised price should be rejected"
            );
        }
    }

    #[test]
    fn test_form_accepts_price_equal_to_ceiling() {
        let allowance = allowance();
        let mut settings = settings_below_ceilings();
        settings.contract_price = allowance.max_contract_price;
        assert!(check_form_gouging(&allowance, &settings).is_ok());
    }

    #[test]
    fn test_payment_rejects_price_equal_to_ceiling() {
        let allowance = allowance();
        let mut settings = settings_below_ceilings();
        settings.contract_price = allowance.max_contract_price;
        assert!(check_payment_gouging(&allowance, &settings).is_err());
    }

    #[test]
    fn test_payment_checks_sector_access_price() {
        let allowance = allowance();
        let mut settings = settings_below_ceilings();
        settings.sector_access_price = Currency::from(2u64);
        assert!(check_form_gouging(&allowance, &settings).is_ok());
        assert!(check_payment_gouging(&allowance, &settings).is_err());
    }

    #[test]
    fn test_zero_ceiling_means_unset() {
        let mut allowance = allowance();
        allowance.max_contract_price = Currency::zero();
        let mut settings = settings_below_ceilings();
        settings.contract_price = Currency::from(1_000_000u64);
        assert!(check_form_gouging(&allowance, &settings).is_ok());
    }
}
