#[cfg(test)]
mod tests {
    use super::super::incremental::*;
    use super::super::indicators::*;

    // Helper function to create sample price data
    fn sample_prices() -> Vec<f64> {
        vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
        ]
    }

    fn trending_prices(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    #[test]
    fn test_sma_basic() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&data, 3).unwrap();
        assert!((result - 4.0).abs() < 0.001); // (3+4+5)/3
    }

    #[test]
    fn test_sma_insufficient_data() {
        let data = vec![1.0, 2.0];
        assert!(sma(&data, 5).is_none());
        assert!(sma(&data, 0).is_none());
    }

    #[test]
    fn test_ema_series_full_length() {
        let data = sample_prices();
        let result = ema_series(&data, 5);
        assert_eq!(result.len(), data.len());
        assert_eq!(result[0], data[0]);
    }

    #[test]
    fn test_ema_series_tracks_uptrend() {
        let data = trending_prices(20);
        let result = ema_series(&data, 3);
        for i in 1..result.len() {
            assert!(result[i] > result[i - 1]);
        }
    }

    #[test]
    fn test_rsi_in_range() {
        let result = rsi(&sample_prices(), 14).unwrap();
        assert!((0.0..=100.0).contains(&result));
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = sample_prices();
        assert!(rsi(&prices[..14], 14).is_none());
        assert!(rsi(&prices[..15], 14).is_some());
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let result = rsi(&trending_prices(20), 14).unwrap();
        assert_eq!(result, 100.0);
    }

    #[test]
    fn test_rsi_deterministic() {
        let prices = sample_prices();
        assert_eq!(rsi(&prices, 14), rsi(&prices, 14));
    }

    #[test]
    fn test_macd_needs_slow_plus_signal() {
        let prices = trending_prices(34);
        assert!(macd(&prices, 12, 26, 9).is_none());
        let prices = trending_prices(35);
        assert!(macd(&prices, 12, 26, 9).is_some());
    }

    #[test]
    fn test_macd_histogram_is_line_minus_signal() {
        let prices = sample_prices()
            .into_iter()
            .chain(trending_prices(30))
            .collect::<Vec<_>>();
        let out = macd(&prices, 12, 26, 9).unwrap();
        assert!((out.histogram - (out.macd - out.signal)).abs() < 1e-12);
    }

    #[test]
    fn test_macd_positive_in_uptrend() {
        let out = macd(&trending_prices(60), 12, 26, 9).unwrap();
        assert!(out.macd > 0.0);
    }

    #[test]
    fn test_bollinger_band_ordering() {
        let out = bollinger(&sample_prices(), 20, 2.0).unwrap();
        assert!(out.upper > out.middle);
        assert!(out.middle > out.lower);
    }

    #[test]
    fn test_bollinger_flat_series_collapses() {
        let data = vec![50.0; 20];
        let out = bollinger(&data, 20, 2.0).unwrap();
        assert_eq!(out.upper, 50.0);
        assert_eq!(out.middle, 50.0);
        assert_eq!(out.lower, 50.0);
    }

    #[test]
    fn test_volume_avg() {
        let volumes = vec![100.0, 200.0, 300.0];
        assert_eq!(volume_avg(&volumes, 2).unwrap(), 250.0);
        assert!(volume_avg(&volumes, 5).is_none());
    }

    #[test]
    fn test_adtv() {
        let closes = vec![10.0, 20.0];
        let volumes = vec![1000.0, 2000.0];
        // (10·1000 + 20·2000) / 2
        assert_eq!(adtv(&closes, &volumes, 2).unwrap(), 25_000.0);
    }

    #[test]
    fn test_all_indicators_partial_history() {
        let closes = trending_prices(60);
        let volumes = vec![1_000_000.0; 60];
        let set = all_indicators(&closes, &volumes);

        assert!(set.rsi.is_some());
        assert!(set.macd.is_some());
        assert!(set.sma50.is_some());
        assert!(set.sma200.is_none()); // only 60 bars
        assert!(set.bollinger.is_some());
        assert!(set.volume_avg.is_some());
    }

    #[test]
    fn test_incremental_rsi_matches_batch() {
        let prices = sample_prices();
        let batch = rsi(&prices, 14).unwrap();
        let tracker = IncrementalRsi::from_history(&prices, 14);
        let streamed = tracker.value().unwrap();
        assert!((batch - streamed).abs() < 1e-9);
    }

    #[test]
    fn test_incremental_rsi_update_matches_batch_extension() {
        let prices = sample_prices();
        let mut tracker = IncrementalRsi::from_history(&prices, 14);
        let streamed = tracker.update(46.21).unwrap();

        let mut extended = prices.clone();
        extended.push(46.21);
        let batch = rsi(&extended, 14).unwrap();

        assert!((batch - streamed).abs() < 1e-9);
    }

    #[test]
    fn test_incremental_macd_matches_batch() {
        let prices = trending_prices(60);
        let batch = macd(&prices, 12, 26, 9).unwrap();
        let tracker = IncrementalMacd::from_history(&prices, 12, 26, 9);
        let streamed = tracker.value().unwrap();

        assert!((batch.macd - streamed.macd).abs() < 1e-9);
        assert!((batch.signal - streamed.signal).abs() < 1e-9);
    }

    #[test]
    fn test_incremental_macd_streams_like_batch() {
        let prices = trending_prices(60);
        let mut tracker = IncrementalMacd::new(12, 26, 9);
        let mut last = None;
        for &p in &prices {
            last = tracker.update(p);
        }

        let batch = macd(&prices, 12, 26, 9).unwrap();
        let streamed = last.unwrap();
        assert!((batch.histogram - streamed.histogram).abs() < 1e-9);
    }
}
