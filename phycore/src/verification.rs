//! Checks to be run on simulation results to make sure the physical layers behave.
//! Each public function, other than [`verify_all`], represents some property that should hold for all simulation results.

use crate::simulation::data_structs::SimOutput;

pub fn verify_all(output: &SimOutput) -> bool {
    no_overlapping_transmission(output)
        && no_overlapping_reception(output)
        && no_reception_while_transmitting(output)
        && single_delivery_per_frame(output)
}

/// No node can make more than one transmission at a time.
pub fn no_overlapping_transmission(output: &SimOutput) -> bool {
    for trans_a in output.transmissions.iter() {
        for trans_b in output.transmissions.iter() {
            if trans_a.id != trans_b.id
                && trans_a.sender == trans_b.sender
                && trans_a.overlaps(trans_b.start_time, trans_b.end_time)
            {
                log::warn!("overlapping transmission {trans_a:?} and {trans_b:?}");
                return false;
            }
        }
    }

    true
}

/// No receiver hands up two frames whose receptions overlap.
pub fn no_overlapping_reception(output: &SimOutput) -> bool {
    for a in output.deliveries.iter() {
        for b in output.deliveries.iter() {
            if a.receiver == b.receiver && a.frame != b.frame && a.overlaps(b) {
                log::warn!("overlapping reception at {}: {a:?} and {b:?}", a.receiver);
                return false;
            }
        }
    }

    true
}

/// No receiver hands up a frame it heard while it was transmitting itself.
pub fn no_reception_while_transmitting(output: &SimOutput) -> bool {
    for delivery in output.deliveries.iter() {
        let own = output.transmissions.iter().find(|t| {
            t.sender == delivery.receiver
                && t.overlaps(delivery.reception_start, delivery.reception_end)
        });

        if let Some(transmission) = own {
            log::warn!("{delivery:?} delivered during {transmission:?}");
            return false;
        }
    }

    true
}

/// Every frame is handed up at most once by each receiver.
pub fn single_delivery_per_frame(output: &SimOutput) -> bool {
    for (n, a) in output.deliveries.iter().enumerate() {
        if output.deliveries[n + 1..]
            .iter()
            .any(|b| a.receiver == b.receiver && a.frame == b.frame)
        {
            log::warn!("frame {} delivered twice at {}", a.frame, a.receiver);
            return false;
        }
    }

    true
}
