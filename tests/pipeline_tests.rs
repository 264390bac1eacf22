#[cfg(test)]
mod pipeline_tests {
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    use rand::seq::SliceRandom;
    use tempfile::TempDir;

    use meshtrace::analysis::{
        self, cache, correlation, export, MatchRule, NetworkTrace, PacketEvent, WindowMode,
    };
    use meshtrace::config::AnalyzerConfig;

    const NODE_A: &str = "\
12:00:00.000010 > Local LoRa address (from WiFi MAC): 000A
12:00:00.000000 > Packet send Type: 00000010 Size: 20 Src: 0x0A Dst: 0xFFFF Id: 7
12:00:00.500000 > Size of Send Packets Queue: 1
12:00:01.000000 > Packet send Type: 00000100 Size: 10 Src: 0x0A Dst: 0xFFFF Id: 8
12:00:01.200000 > Size of Send Packets Queue: 0
";

    const NODE_B: &str = "\
12:00:00.000001 > Local LoRa address (from WiFi MAC): 000B
12:00:00.000150 > Receiving LoRa packet: Size: 20 bytes RSSI: -40 SNR: 9
12:00:00.000150 > Packet received Type: 00000010 Size: 20 Src: 0x0A Dst: 0xFFFF Id: 7
12:00:01.000100 > Receiving LoRa packet: Size: 10 bytes RSSI: -41 SNR: 9
12:00:01.000100 > Packet received Type: 00000100 Size: 10 Src: 0x0A Dst: 0xFFFF Id: 8
";

    // Node C has no address announcement and one broken record
    const NODE_C: &str = "\
12:00:00.000120 > Receiving LoRa packet: Size: 20 bytes RSSI: -70 SNR: 3
12:00:00.000120 > Packet received Type: 00000010 Size: 20 Src: 0x0A Dst: 0xFFFF Id: 7
12:00:00.700000 > Packet received Size: 20 Src: 0x0A Dst: 0xFFFF Id: 9
12:00:02.000000 > E: Radio timeout
";

    fn write_logs(dir: &TempDir) -> Vec<PathBuf> {
        [
            ("monitor_120000_COM3.txt", NODE_A),
            ("monitor_120000_COM4.txt", NODE_B),
            ("monitor_120000_COM5.txt", NODE_C),
        ]
        .iter()
        .map(|(name, content)| {
            let path = dir.path().join(name);
            fs::write(&path, content).unwrap();
            path
        })
        .collect()
    }

    fn ingest(dir: &TempDir) -> NetworkTrace {
        analysis::ingest_all(&write_logs(dir), &AnalyzerConfig::default())
    }

    fn key(p: &PacketEvent) -> String {
        format!("{:?}|{}|{:?}|{}", p.observer, p.timestamp, p.id, p.direction)
    }

    #[test]
    fn test_nodes_keep_input_order() {
        let dir = TempDir::new().unwrap();
        let trace = ingest(&dir);

        assert_eq!(trace.node_count(), 3);
        assert_eq!(trace.nodes[0].name, "monitor_120000_COM3.txt");
        assert_eq!(trace.nodes[0].address.as_ref().unwrap().as_str(), "0x0a");
        assert_eq!(trace.nodes[1].address.as_ref().unwrap().as_str(), "0x0b");
        assert!(trace.nodes[2].address.is_none());
        assert!(trace.unreadable.is_empty());
    }

    #[test]
    fn test_malformed_record_does_not_stop_ingestion() {
        let dir = TempDir::new().unwrap();
        let trace = ingest(&dir);
        let c = &trace.nodes[2];

        assert_eq!(c.packets.len(), 1);
        assert_eq!(c.errors.len(), 1);
        assert_eq!(c.radio_receptions, 1);
        assert_eq!(c.diagnostics.len(), 1);
        assert_eq!(c.diagnostics[0].line, 3);
        assert_eq!(c.diagnostics[0].file, "monitor_120000_COM5.txt");
    }

    #[test]
    fn test_broadcast_receipts_are_correlated() {
        let dir = TempDir::new().unwrap();
        let trace = ingest(&dir);

        for window in [WindowMode::Compatible, WindowMode::Strict] {
            let rule = MatchRule::new(Duration::from_micros(200), window);
            let deliveries = analysis::correlate(&trace, &rule);

            assert_eq!(deliveries.len(), 2);
            let data = &deliveries[0];
            assert_eq!(data.send.id, Some(7));
            assert_eq!(data.receipts.len(), 2);
            assert_eq!(data.receipts[0].observer, trace.nodes[1].address);
            assert_eq!(data.receipts[1].observer, None);

            let hello = &deliveries[1];
            assert_eq!(hello.receipts.len(), 1);
        }
    }

    #[test]
    fn test_node_without_address_has_no_per_node_matches() {
        let dir = TempDir::new().unwrap();
        let trace = ingest(&dir);
        let deliveries = analysis::correlate(&trace, &MatchRule::default());

        let c = correlation::receipts_observed_by(&deliveries, trace.nodes[2].address.as_ref());
        assert!(c.is_empty());
        let b = correlation::receipts_observed_by(&deliveries, trace.nodes[1].address.as_ref());
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_correlation_is_order_independent() {
        let dir = TempDir::new().unwrap();
        let trace = ingest(&dir);
        let rule = MatchRule::new(Duration::from_micros(200), WindowMode::Strict);

        let sends: Vec<&PacketEvent> = trace.sent().collect();
        let receipts: Vec<&PacketEvent> = trace.received().collect();

        let pairs = |sends: &[&PacketEvent], receipts: &[&PacketEvent]| {
            correlation::correlate_events(sends, receipts, &rule)
                .iter()
                .flat_map(|d| d.receipts.iter().map(move |r| (key(d.send), key(r))))
                .collect::<BTreeSet<(String, String)>>()
        };

        let expected = pairs(&sends, &receipts);
        assert_eq!(expected.len(), 3);

        let mut rng = rand::thread_rng();
        for _ in 0..10 {
            let mut shuffled_sends = sends.clone();
            let mut shuffled_receipts = receipts.clone();
            shuffled_sends.shuffle(&mut rng);
            shuffled_receipts.shuffle(&mut rng);
            assert_eq!(pairs(&shuffled_sends, &shuffled_receipts), expected);
        }
    }

    #[test]
    fn test_aggregate_three_nodes_two_packets() {
        let dir = TempDir::new().unwrap();
        let trace = ingest(&dir);
        let deliveries = analysis::correlate(&trace, &MatchRule::default());
        let stats = analysis::aggregate(&trace, &deliveries);

        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.total_sent, 2);
        assert_eq!(stats.total_received, 3);
        assert_eq!(stats.max_possible_received, stats.total_sent * (stats.node_count - 1));
        assert_eq!(stats.loss_count, 1);
        assert_eq!(stats.loss_percent, Some(-25.0));
        assert_eq!(stats.radio_receptions, 3);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.diagnostic_count, 1);
        assert_eq!(stats.elapsed.as_deref(), Some("0:00:02.000"));
        assert_eq!(stats.correlation.sends, 2);
        assert_eq!(stats.correlation.matched_receipts, 3);
        assert_eq!(stats.queue_timelines[0].points.len(), 2);
    }

    #[test]
    fn test_payload_identity_holds_for_every_packet() {
        let dir = TempDir::new().unwrap();
        let config = AnalyzerConfig::default();
        let trace = analysis::ingest_all(&write_logs(&dir), &config);

        for p in trace.packets() {
            assert_eq!(
                p.payload_size + i64::from(config.header.overhead(p.packet_type)),
                i64::from(p.total_size)
            );
        }
    }

    #[test]
    fn test_export_round_trip() {
        let dir = TempDir::new().unwrap();
        let trace = ingest(&dir);

        let path = dir.path().join("data.json");
        export::write_rows(&export::trace_to_rows(&trace), &path).unwrap();
        let rebuilt = export::rows_to_trace(&export::read_rows(&path).unwrap()).unwrap();

        assert_eq!(rebuilt.node_count(), 3);
        for (original, restored) in trace.nodes.iter().zip(&rebuilt.nodes) {
            assert_eq!(original.name, restored.name);
            assert_eq!(original.packets, restored.packets);
            assert_eq!(original.errors, restored.errors);
        }
    }

    #[test]
    fn test_cached_trace_gives_same_stats() {
        let dir = TempDir::new().unwrap();
        let trace = ingest(&dir);
        let path = dir.path().join("trace.bin.zst");

        cache::save_trace(&trace, &path).unwrap();
        let loaded = cache::load_trace(&path).unwrap();

        let rule = MatchRule::default();
        let before = analysis::aggregate(&trace, &analysis::correlate(&trace, &rule));
        let after = analysis::aggregate(&loaded, &analysis::correlate(&loaded, &rule));
        assert_eq!(before, after);
    }
}
