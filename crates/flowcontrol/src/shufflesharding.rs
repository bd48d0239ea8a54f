//! Shuffle sharding: maps a flow to a small hand of queues out of a larger
//! deck.
//!
//! Two unrelated flows only interfere completely when their hands collide,
//! and the chance of that shrinks combinatorially with the deck and hand
//! sizes. Picking the shortest queue within the hand then keeps a single busy
//! flow from starving the other flows that share some of its queues.

use thiserror::Error;

/// Number of bits of a `u64` hash that dealing may consume.
pub const MAX_HASH_BITS: u32 = 60;

// A deck of one card allows a hand of one; any larger deck needs at least one
// bit per card, so no valid hand is larger than this.
const MAX_HAND_SIZE: usize = MAX_HASH_BITS as usize;

/// Reasons a [`Dealer`] cannot be built.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DealerError {
    /// Deck or hand size is zero.
    #[error("deck size {deck_size} and hand size {hand_size} must both be positive")]
    NotPositive {
        /// Requested deck size.
        deck_size: usize,
        /// Requested hand size.
        hand_size: usize,
    },
    /// The deck does not fit in an `i32`.
    #[error("deck size {0} is larger than {}", i32::MAX)]
    DeckTooLarge(usize),
    /// The hand is larger than the deck.
    #[error("hand size {hand_size} is greater than deck size {deck_size}")]
    HandTooLarge {
        /// Requested deck size.
        deck_size: usize,
        /// Requested hand size.
        hand_size: usize,
    },
    /// Dealing would need more hash bits than are available.
    #[error(
        "required entropy bits of deck size {deck_size} and hand size {hand_size} is {bits}, which is greater than {}",
        MAX_HASH_BITS
    )]
    EntropyTooHigh {
        /// Requested deck size.
        deck_size: usize,
        /// Requested hand size.
        hand_size: usize,
        /// Bits the configuration would need.
        bits: u32,
    },
}

/// Number of hash bits needed to deal `hand_size` cards from `deck_size`
/// without bias: `ceil(log2(deck_size) * hand_size)`.
pub fn required_entropy_bits(deck_size: usize, hand_size: usize) -> u32 {
    ((deck_size as f64).log2() * hand_size as f64).ceil() as u32
}

/// Deals hands of a fixed size from a deck of a fixed size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dealer {
    deck_size: usize,
    hand_size: usize,
}

impl Dealer {
    /// Builds a dealer, rejecting parameters that cannot be dealt from a
    /// 60 bit hash.
    pub fn new(deck_size: usize, hand_size: usize) -> Result<Self, DealerError> {
        if deck_size == 0 || hand_size == 0 {
            return Err(DealerError::NotPositive {
                deck_size,
                hand_size,
            });
        }
        if deck_size > i32::MAX as usize {
            return Err(DealerError::DeckTooLarge(deck_size));
        }
        if hand_size > deck_size {
            return Err(DealerError::HandTooLarge {
                deck_size,
                hand_size,
            });
        }
        let bits = required_entropy_bits(deck_size, hand_size);
        if bits > MAX_HASH_BITS {
            return Err(DealerError::EntropyTooHigh {
                deck_size,
                hand_size,
                bits,
            });
        }
        Ok(Dealer {
            deck_size,
            hand_size,
        })
    }

    /// The number of cards in the deck.
    pub fn deck_size(&self) -> usize {
        self.deck_size
    }

    /// The number of cards in a hand.
    pub fn hand_size(&self) -> usize {
        self.hand_size
    }

    /// Deals a hand for `hash_value`, calling `pick` once per card in deal
    /// order. The cards are distinct and lie in `[0, deck_size)`.
    ///
    /// The hash is read as a mixed-radix number whose digits select a card
    /// from the cards not yet dealt, as in a partial Fisher-Yates shuffle.
    pub fn deal(&self, mut hash_value: u64, mut pick: impl FnMut(usize)) {
        let mut remainders = [0usize; MAX_HAND_SIZE];
        for (i, remainder) in remainders.iter_mut().take(self.hand_size).enumerate() {
            let radix = (self.deck_size - i) as u64;
            *remainder = (hash_value % radix) as usize;
            hash_value /= radix;
        }

        for i in 0..self.hand_size {
            let mut card = remainders[i];
            for j in (0..i).rev() {
                if card >= remainders[j] {
                    card += 1;
                }
            }
            pick(card);
        }
    }

    /// Deals a hand into `hand`, replacing its contents.
    pub fn deal_into_hand(&self, hash_value: u64, hand: &mut Vec<usize>) {
        hand.clear();
        hand.reserve(self.hand_size);
        self.deal(hash_value, |card| hand.push(card));
    }

    /// Deals a hand and returns the card whose queue is shortest according
    /// to `queue_length`. Ties go to the lowest index.
    pub fn pick_shortest(&self, hash_value: u64, queue_length: impl Fn(usize) -> usize) -> usize {
        let mut best: Option<(usize, usize)> = None;
        self.deal(hash_value, |card| {
            let candidate = (queue_length(card), card);
            best = match best {
                Some(current) if current <= candidate => Some(current),
                _ => Some(candidate),
            };
        });
        // A dealer always has at least one card in hand.
        best.map(|(_, card)| card).unwrap_or_default()
    }
}

/// Assigns a queue to the flow with hash `flow_hash`, given the current
/// length of every queue. `queue_lengths.len()` is the deck size.
pub fn assign_queue(
    flow_hash: u64,
    queue_lengths: &[usize],
    hand_size: usize,
) -> Result<usize, DealerError> {
    let dealer = Dealer::new(queue_lengths.len(), hand_size)?;
    Ok(dealer.pick_shortest(flow_hash, |i| queue_lengths[i]))
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn entropy_bits() {
        assert_eq!(required_entropy_bits(128, 6), 42);
        assert_eq!(required_entropy_bits(1, 1), 0);
        assert_eq!(required_entropy_bits(2, 60), 60);
        assert_eq!(required_entropy_bits(3, 1), 2);
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(matches!(
            Dealer::new(0, 1),
            Err(DealerError::NotPositive { .. })
        ));
        assert!(matches!(
            Dealer::new(4, 0),
            Err(DealerError::NotPositive { .. })
        ));
        assert!(matches!(
            Dealer::new(4, 5),
            Err(DealerError::HandTooLarge { .. })
        ));
        assert!(matches!(
            Dealer::new(1 << 20, 4),
            Err(DealerError::EntropyTooHigh { bits: 80, .. })
        ));
        assert!(Dealer::new(1, 1).is_ok());
        assert!(Dealer::new(2, 2).is_ok());
    }

    #[test]
    fn deals_whole_deck() {
        let dealer = Dealer::new(8, 8).unwrap();
        for hash in [0u64, 1, 7, 12345, u64::MAX] {
            let mut hand = Vec::new();
            dealer.deal_into_hand(hash, &mut hand);
            let mut sorted = hand.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..8).collect::<Vec<_>>());
        }
    }

    #[test]
    fn first_card_is_hash_modulo_deck() {
        let dealer = Dealer::new(128, 6).unwrap();
        let mut hand = Vec::new();
        dealer.deal_into_hand(300, &mut hand);
        assert_eq!(hand[0], 300 % 128);
    }

    #[test]
    fn picks_shortest_queue_in_hand() {
        let dealer = Dealer::new(16, 4).unwrap();
        let mut hand = Vec::new();
        dealer.deal_into_hand(987_654_321, &mut hand);

        let mut lengths = vec![100usize; 16];
        let expected = hand[2];
        lengths[expected] = 3;
        // A shorter queue outside the hand must not be chosen.
        let outside = (0..16).find(|q| !hand.contains(q)).unwrap();
        lengths[outside] = 0;

        assert_eq!(dealer.pick_shortest(987_654_321, |i| lengths[i]), expected);
        assert_eq!(assign_queue(987_654_321, &lengths, 4).unwrap(), expected);
    }

    #[test]
    fn ties_go_to_lowest_index() {
        let dealer = Dealer::new(16, 4).unwrap();
        let mut hand = Vec::new();
        dealer.deal_into_hand(42, &mut hand);
        let lowest = *hand.iter().min().unwrap();
        assert_eq!(dealer.pick_shortest(42, |_| 7), lowest);
    }

    #[test]
    fn hands_spread_across_deck() {
        let dealer = Dealer::new(64, 4).unwrap();
        let mut seen = HashSet::new();
        let mut hand = Vec::new();
        for hash in 0..4096u64 {
            dealer.deal_into_hand(hash.wrapping_mul(0x9E37_79B9_7F4A_7C15), &mut hand);
            seen.extend(hand.iter().copied());
        }
        assert_eq!(seen.len(), 64);
    }

    fn valid_parameters() -> impl Strategy<Value = (usize, usize)> {
        (1usize..=4096).prop_flat_map(|deck| {
            let max_hand = (1..=deck.min(MAX_HAND_SIZE))
                .take_while(|hand| required_entropy_bits(deck, *hand) <= MAX_HASH_BITS)
                .last()
                .unwrap_or(1);
            (Just(deck), 1usize..=max_hand)
        })
    }

    proptest! {
        #[test]
        fn hand_cards_are_distinct_and_in_range(
            (deck, hand_size) in valid_parameters(),
            hash in any::<u64>(),
        ) {
            let dealer = Dealer::new(deck, hand_size).unwrap();
            let mut hand = Vec::new();
            dealer.deal_into_hand(hash, &mut hand);

            prop_assert_eq!(hand.len(), hand_size);
            prop_assert!(hand.iter().all(|card| *card < deck));
            let distinct: HashSet<_> = hand.iter().collect();
            prop_assert_eq!(distinct.len(), hand_size);
        }

        #[test]
        fn assignment_is_deterministic(
            (deck, hand_size) in valid_parameters(),
            hash in any::<u64>(),
            seed in any::<u64>(),
        ) {
            let lengths: Vec<usize> = (0..deck)
                .map(|i| ((seed ^ i as u64).wrapping_mul(31) % 17) as usize)
                .collect();
            let first = assign_queue(hash, &lengths, hand_size).unwrap();
            let second = assign_queue(hash, &lengths, hand_size).unwrap();
            prop_assert!(first < deck);
            prop_assert_eq!(first, second);
        }
    }
}
